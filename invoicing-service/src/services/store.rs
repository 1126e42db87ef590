//! Persistence seam for bill runs and invoices.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{BillRun, Invoice};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Cut-off for treating an untouched invoice's job as lost: anything last
/// updated before it is older than `stale_after`.
pub fn stale_before(stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Outcome of trying to take an invoice for pricing.
#[derive(Debug, Clone)]
pub enum InvoiceClaim {
    /// Moved to PROCESSING; the caller prices it.
    Claimed(Invoice),
    /// Already priced; must not be priced again.
    Finished(Invoice),
    /// Another job is pricing it right now.
    Busy,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Insert a new run. Runs are unique per creation date and execution type.
    async fn create_bill_run(&self, run: &BillRun) -> Result<(), StoreError>;

    async fn get_bill_run(&self, id: Uuid) -> Result<Option<BillRun>, StoreError>;

    async fn find_bill_run(
        &self,
        creation_date: NaiveDate,
        execution_type: &str,
    ) -> Result<Option<BillRun>, StoreError>;

    async fn update_bill_run(&self, run: &BillRun) -> Result<(), StoreError>;

    /// Insert a new invoice. Invoices are unique per organization and period.
    async fn create_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    /// Atomically move an invoice to PROCESSING. See [`Invoice::is_claimable`]
    /// for the states it can be taken from. `None` when the invoice is unknown.
    async fn claim_invoice(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<InvoiceClaim>, StoreError>;

    async fn list_invoices_for_bill_run(&self, bill_run_id: Uuid) -> Result<Vec<Invoice>, StoreError>;

    /// Invoices a re-run may pick up (see [`Invoice::is_rerunnable`]): those of
    /// `bill_run_id` when given, otherwise those created at or after `since`.
    async fn list_rerunnable_invoices(
        &self,
        since: DateTime<Utc>,
        bill_run_id: Option<Uuid>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
