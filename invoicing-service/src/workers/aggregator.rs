//! Folds worker results into their bill run.

use async_trait::async_trait;
use rating_service::rounding::Rounder;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::models::WorkerResult;
use crate::services::store::BillingStore;
use crate::workers::pool::ResultSink;

/// The only writer of bill runs once they are created. Results are applied
/// one at a time by the pool's results consumer.
pub struct BillRunAggregator {
    store: Arc<dyn BillingStore>,
    rounder: Rounder,
}

impl BillRunAggregator {
    pub fn new(store: Arc<dyn BillingStore>, rounder: Rounder) -> Self {
        Self { store, rounder }
    }
}

#[async_trait]
impl ResultSink for BillRunAggregator {
    #[instrument(
        skip(self, result),
        fields(
            bill_run_id = %result.bill_run_id,
            organization_id = %result.organization_id,
            status = result.status.as_str()
        )
    )]
    async fn on_result(&self, result: WorkerResult) {
        let mut run = match self.store.get_bill_run(result.bill_run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!("Result for unknown bill run dropped");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load bill run");
                return;
            }
        };

        let before = run.status;
        run.apply(&result);
        run.amount_invoiced = self.rounder.round(run.amount_invoiced);

        if let Err(e) = self.store.update_bill_run(&run).await {
            error!(error = %e, "Failed to persist bill run");
            return;
        }

        if run.status != before && run.status.is_terminal() {
            info!(
                status = run.status.as_str(),
                processed = run.invoices_processed_count,
                errors = run.invoices_error_count,
                amount_invoiced = run.amount_invoiced,
                "Bill run completed"
            );
        }
    }
}
