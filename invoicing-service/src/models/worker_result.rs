//! Outcome of one invoicing job.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Finished,
    Error,
    /// The job was never priced: it failed before reaching a worker
    /// (duplicate or unrecordable invoice, unknown organization, unparseable
    /// period) or another job held its invoice.
    Rejected,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Finished => "finished",
            ResultStatus::Error => "error",
            ResultStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub bill_run_id: Uuid,
    pub organization_id: String,
    pub amount: f64,
    pub status: ResultStatus,
}

impl WorkerResult {
    pub fn finished(bill_run_id: Uuid, organization_id: impl Into<String>, amount: f64) -> Self {
        Self {
            bill_run_id,
            organization_id: organization_id.into(),
            amount,
            status: ResultStatus::Finished,
        }
    }

    pub fn error(bill_run_id: Uuid, organization_id: impl Into<String>) -> Self {
        Self {
            bill_run_id,
            organization_id: organization_id.into(),
            amount: 0.0,
            status: ResultStatus::Error,
        }
    }

    pub fn rejected(bill_run_id: Uuid, organization_id: impl Into<String>) -> Self {
        Self {
            bill_run_id,
            organization_id: organization_id.into(),
            amount: 0.0,
            status: ResultStatus::Rejected,
        }
    }
}
