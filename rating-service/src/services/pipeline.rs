//! Rate, persist, then notify the ledger.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::models::{CdrSave, CostedReport, UsageReport};
use crate::services::cdr_store::{CdrError, CdrRepository};
use crate::services::ledger::{LedgerForwarder, LedgerMessage};
use crate::services::rating::{RatingContext, RatingEngine, RatingError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Rating(#[from] RatingError),

    #[error(transparent)]
    Cdr(#[from] CdrError),
}

#[derive(Clone)]
pub struct RatingPipeline {
    engine: Arc<RatingEngine>,
    cdrs: Arc<dyn CdrRepository>,
    ledger: LedgerForwarder,
}

impl RatingPipeline {
    pub fn new(
        engine: Arc<RatingEngine>,
        cdrs: Arc<dyn CdrRepository>,
        ledger: LedgerForwarder,
    ) -> Self {
        Self {
            engine,
            cdrs,
            ledger,
        }
    }

    pub fn engine(&self) -> &Arc<RatingEngine> {
        &self.engine
    }

    pub fn cdrs(&self) -> &Arc<dyn CdrRepository> {
        &self.cdrs
    }

    /// Rate `report`, store the result and queue the matching ledger
    /// message. Nothing is stored or forwarded when rating fails.
    #[instrument(
        skip(self, report, ctx),
        fields(organization_id = %report.organization_id, regenerate = regenerate)
    )]
    pub async fn process(
        &self,
        report: &UsageReport,
        ctx: &RatingContext,
        regenerate: bool,
    ) -> Result<(CostedReport, CdrSave), PipelineError> {
        let costed = self.engine.rate(report, ctx).await?;
        let saved = self.record(&costed, regenerate).await?;
        Ok((costed, saved))
    }

    /// Store an already priced report and queue its ledger message.
    pub async fn record(
        &self,
        costed: &CostedReport,
        regenerate: bool,
    ) -> Result<CdrSave, CdrError> {
        let saved = self.cdrs.save(costed, regenerate).await?;
        self.ledger.forward(LedgerMessage::from_save(&saved));

        info!(
            cdr_id = %saved.record().cdr_id,
            organization_id = %costed.organization_id,
            net_cost = costed.net_cost,
            "Costed report recorded"
        );
        Ok(saved)
    }
}
