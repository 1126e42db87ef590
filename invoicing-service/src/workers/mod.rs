//! Invoice worker pool: jobs, workers and the bill run aggregator.

pub mod aggregator;
pub mod job;
pub mod pool;

pub use aggregator::BillRunAggregator;
pub use job::{InvoiceJob, InvoiceProcessor};
pub use pool::{JobProcessor, PoolConfig, PoolError, PoolHandle, ResultSink, WorkerPool};
