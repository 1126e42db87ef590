//! Domain models for invoicing-service.

mod bill_run;
mod invoice;
mod period;
mod worker_result;

pub use bill_run::{BillRun, BillRunStatus, PERIODIC_EXECUTION};
pub use invoice::{Invoice, InvoiceStatus, OrganizationType};
pub use period::{Period, PeriodKind};
pub use worker_result::{ResultStatus, WorkerResult};
