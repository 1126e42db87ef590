//! Services for invoicing-service.

pub mod database;
pub mod error;
pub mod generator;
pub mod memory;
pub mod metrics;
pub mod periods;
pub mod scheduler;
pub mod store;

pub use database::Database;
pub use error::InvoicingError;
pub use generator::{
    GenerationOutcome, GenerationStatus, InvoiceGenerator, RerunOutcome, RerunStatus,
};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use periods::{period_for, periods};
pub use scheduler::{spawn_scheduler, SchedulerConfig};
pub use store::{BillingStore, InvoiceClaim, StoreError};
