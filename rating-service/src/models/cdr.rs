//! Persisted CDR (charge data record) row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::CostedReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdrRecord {
    pub cdr_id: Uuid,
    pub organization_id: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub net_cost: f64,
    pub report: CostedReport,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Outcome of persisting a report.
#[derive(Debug, Clone, PartialEq)]
pub enum CdrSave {
    Created(CdrRecord),
    /// The report replaced an earlier rating of the same organization and
    /// period; carries the previous net cost.
    Replaced { record: CdrRecord, previous_net_cost: f64 },
}

impl CdrSave {
    pub fn record(&self) -> &CdrRecord {
        match self {
            CdrSave::Created(record) => record,
            CdrSave::Replaced { record, .. } => record,
        }
    }
}
