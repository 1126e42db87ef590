//! Periodic invoicing trigger.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::services::generator::InvoiceGenerator;

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Sweep interval; the scheduler is off when unset.
    pub interval: Option<Duration>,
    /// Token forwarded to the catalog on scheduled sweeps.
    pub service_token: String,
}

/// Fire `generate_periodic` for today's date every interval. The first sweep
/// runs one interval after startup.
pub fn spawn_scheduler(
    generator: Arc<InvoiceGenerator>,
    config: SchedulerConfig,
) -> Option<JoinHandle<()>> {
    let every = config.interval?.max(Duration::from_secs(1));
    info!(interval_secs = every.as_secs(), "Periodic invoicing enabled");

    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let today = Utc::now().date_naive();
            match generator
                .generate_periodic(today, &config.service_token)
                .await
            {
                Ok(outcome) => info!(
                    bill_run_id = %outcome.bill_run_id,
                    status = ?outcome.status,
                    "Scheduled sweep triggered"
                ),
                Err(e) => error!(error = %e, "Scheduled sweep failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WorkerResult, PERIODIC_EXECUTION};
    use crate::services::memory::MemoryStore;
    use crate::services::store::BillingStore;
    use crate::workers::{BillRunAggregator, InvoiceJob, JobProcessor, PoolConfig, WorkerPool};
    use async_trait::async_trait;
    use rating_service::rounding::Rounder;
    use rating_service::services::{CatalogCache, StaticCatalog};

    struct Echo;

    #[async_trait]
    impl JobProcessor for Echo {
        async fn process(&self, job: InvoiceJob) -> WorkerResult {
            WorkerResult::finished(job.bill_run_id, job.organization_id, 0.0)
        }
    }

    fn generator(store: Arc<dyn BillingStore>) -> Arc<InvoiceGenerator> {
        let catalog = Arc::new(CatalogCache::new(
            Arc::new(StaticCatalog::default()),
            Duration::from_secs(60),
        ));
        let pool = WorkerPool::new(
            PoolConfig {
                worker_count: 1,
                max_queue_size: 4,
            },
            Arc::new(Echo),
            Arc::new(BillRunAggregator::new(store.clone(), Rounder::default())),
        );
        Arc::new(InvoiceGenerator::new(
            store,
            catalog,
            pool,
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn test_scheduler_is_off_without_interval() {
        let store: Arc<dyn BillingStore> = Arc::new(MemoryStore::new());
        assert!(spawn_scheduler(generator(store), SchedulerConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_scheduler_triggers_periodic_sweep() {
        let store: Arc<dyn BillingStore> = Arc::new(MemoryStore::new());
        let handle = spawn_scheduler(
            generator(store.clone()),
            SchedulerConfig {
                interval: Some(Duration::from_secs(1)),
                service_token: "service".to_string(),
            },
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut found = None;
        while found.is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let today = Utc::now().date_naive();
            found = store.find_bill_run(today, PERIODIC_EXECUTION).await.unwrap();
        }
        handle.abort();

        let run = found.expect("scheduled sweep should create a periodic bill run");
        assert_eq!(run.invoices_count, 0);
    }
}
