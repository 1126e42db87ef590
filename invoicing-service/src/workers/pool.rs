//! Invoice worker pool.
//!
//! A pool runs in generations. The first `start` on an idle pool spawns the
//! workers and a results consumer; later `start`s join the running
//! generation. Each `start` reserves a number of jobs, and the generation
//! shuts down once every reserved job has produced a result (or its
//! reservation was released). The job buffer grows to the largest
//! reservation seen, capped at `max_queue_size`, and never shrinks.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::WorkerResult;
use crate::services::metrics::set_pending_jobs;
use crate::workers::job::InvoiceJob;

/// Turns one job into exactly one result. Must not fail.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: InvoiceJob) -> WorkerResult;
}

/// Single consumer of worker results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn on_result(&self, result: WorkerResult);
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub max_queue_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no job reservation left on this handle")]
    NoReservation,

    #[error("worker pool generation is closed")]
    Closed,
}

struct QueuedJob {
    job: InvoiceJob,
    // Held while the job waits in the buffer.
    permit: OwnedSemaphorePermit,
}

#[derive(Clone)]
struct Generation {
    id: u64,
    jobs: mpsc::UnboundedSender<QueuedJob>,
    results: mpsc::UnboundedSender<WorkerResult>,
    capacity: Arc<Semaphore>,
    shutdown: CancellationToken,
}

struct PoolState {
    generation: u64,
    current: Option<Generation>,
    buffer_size: usize,
    pending: usize,
}

struct Shared {
    processor: Arc<dyn JobProcessor>,
    sink: Arc<dyn ResultSink>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    active: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Account for `count` reservations that are settled. Returns true when
    /// this closed the generation.
    fn settle(&self, count: usize) -> bool {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(count);
        set_pending_jobs(state.pending);
        if state.pending > 0 {
            return false;
        }

        if let Some(generation) = state.current.take() {
            generation.shutdown.cancel();
            info!(generation = generation.id, "Worker pool drained");
        }
        self.active.send_replace(false);
        true
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        processor: Arc<dyn JobProcessor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                processor,
                sink,
                config,
                state: Mutex::new(PoolState {
                    generation: 0,
                    current: None,
                    buffer_size: 0,
                    pending: 0,
                }),
                active,
            }),
        }
    }

    /// Reserve `expected` jobs, starting a generation if the pool is idle.
    pub fn start(&self, expected: usize) -> PoolHandle {
        if expected == 0 {
            return PoolHandle {
                shared: self.shared.clone(),
                generation: None,
                remaining: 0,
            };
        }

        let mut state = self.shared.lock();
        let generation = match state.current.clone() {
            Some(generation) => generation,
            None => self.spawn_generation(&mut state),
        };

        let wanted = expected.min(self.shared.config.max_queue_size).max(1);
        if wanted > state.buffer_size {
            generation.capacity.add_permits(wanted - state.buffer_size);
            debug!(from = state.buffer_size, to = wanted, "Job buffer grown");
            state.buffer_size = wanted;
        }

        state.pending += expected;
        set_pending_jobs(state.pending);

        PoolHandle {
            shared: self.shared.clone(),
            generation: Some(generation),
            remaining: expected,
        }
    }

    /// Wait until the pool has no running generation.
    pub async fn drain(&self) {
        let mut active = self.shared.active.subscribe();
        let _ = active.wait_for(|active| !*active).await;
    }

    pub fn is_active(&self) -> bool {
        *self.shared.active.borrow()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.lock().buffer_size
    }

    /// Id of the running generation, or of the last one if idle.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    fn spawn_generation(&self, state: &mut PoolState) -> Generation {
        state.generation += 1;
        let id = state.generation;

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let generation = Generation {
            id,
            jobs: jobs_tx,
            results: results_tx.clone(),
            capacity: Arc::new(Semaphore::new(state.buffer_size)),
            shutdown: CancellationToken::new(),
        };

        let worker_count = self.shared.config.worker_count.max(1);
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                generation: id,
                processor: self.shared.processor.clone(),
                jobs: jobs_rx.clone(),
                results: results_tx.clone(),
                shutdown: generation.shutdown.clone(),
            };
            tokio::spawn(worker.run());
        }

        tokio::spawn(consume_results(
            self.shared.clone(),
            id,
            results_rx,
            generation.shutdown.clone(),
        ));

        self.shared.active.send_replace(true);
        info!(
            generation = id,
            worker_count = worker_count,
            "Worker pool generation started"
        );

        state.current = Some(generation.clone());
        generation
    }
}

/// Reservation of jobs in a pool generation. Dropping the handle releases
/// whatever was not submitted.
pub struct PoolHandle {
    shared: Arc<Shared>,
    generation: Option<Generation>,
    remaining: usize,
}

impl PoolHandle {
    /// Queue a job, waiting while the buffer is full.
    pub async fn submit(&mut self, job: InvoiceJob) -> Result<(), PoolError> {
        let generation = self.reserved()?;
        let permit = generation
            .capacity
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        generation
            .jobs
            .send(QueuedJob { job, permit })
            .map_err(|_| PoolError::Closed)?;
        self.remaining -= 1;
        Ok(())
    }

    /// Settle a reservation with a result produced before the job could reach
    /// a worker.
    pub fn reject(&mut self, result: WorkerResult) -> Result<(), PoolError> {
        let generation = self.reserved()?;
        generation
            .results
            .send(result)
            .map_err(|_| PoolError::Closed)?;
        self.remaining -= 1;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn reserved(&self) -> Result<&Generation, PoolError> {
        match &self.generation {
            Some(generation) if self.remaining > 0 => Ok(generation),
            _ => Err(PoolError::NoReservation),
        }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if self.remaining > 0 && self.generation.is_some() {
            debug!(released = self.remaining, "Releasing unused job reservations");
            self.shared.settle(self.remaining);
        }
    }
}

struct Worker {
    id: usize,
    generation: u64,
    processor: Arc<dyn JobProcessor>,
    jobs: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    results: mpsc::UnboundedSender<WorkerResult>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let queued = {
                let mut jobs = self.jobs.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => None,
                    job = jobs.recv() => job,
                }
            };
            let Some(QueuedJob { job, permit }) = queued else {
                break;
            };
            drop(permit);

            let result = self.execute(job).await;
            if self.results.send(result).is_err() {
                break;
            }
        }
        debug!(worker_id = self.id, generation = self.generation, "Worker exiting");
    }

    /// Run the job on its own task so a panic becomes an error result.
    async fn execute(&self, job: InvoiceJob) -> WorkerResult {
        let bill_run_id = job.bill_run_id;
        let organization_id = job.organization_id.clone();
        let processor = self.processor.clone();

        match tokio::spawn(async move { processor.process(job).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    worker_id = self.id,
                    organization_id = %organization_id,
                    error = %e,
                    "Invoice job aborted"
                );
                WorkerResult::error(bill_run_id, organization_id)
            }
        }
    }
}

async fn consume_results(
    shared: Arc<Shared>,
    generation: u64,
    mut results: mpsc::UnboundedReceiver<WorkerResult>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            result = results.recv() => {
                let Some(result) = result else { break };
                shared.sink.on_result(result).await;
                if shared.settle(1) {
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!(generation = generation, "Result consumer exiting");
}
