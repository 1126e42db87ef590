//! CDR persistence seam and the in-memory backend.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{CdrRecord, CdrSave, CostedReport};

#[derive(Debug, thiserror::Error)]
pub enum CdrError {
    #[error("CDR already stored for '{organization_id}' from {from} to {to}")]
    Duplicate {
        organization_id: String,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("CDR storage failed: {0}")]
    Storage(String),
}

impl From<CdrError> for AppError {
    fn from(err: CdrError) -> Self {
        match err {
            CdrError::Duplicate { .. } => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            CdrError::Storage(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
        }
    }
}

/// Storage for rated reports. One record per organization and period.
#[async_trait]
pub trait CdrRepository: Send + Sync {
    /// Persist a rated report. An existing record for the same organization
    /// and period is a duplicate unless `regenerate` is set, in which case it
    /// is replaced.
    async fn save(&self, report: &CostedReport, regenerate: bool) -> Result<CdrSave, CdrError>;

    /// Records of one organization, optionally restricted to periods starting
    /// at or after `from` and ending at or before `to`, oldest first.
    async fn list(
        &self,
        organization_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CdrRecord>, CdrError>;

    async fn health_check(&self) -> Result<(), CdrError>;
}

type PeriodKey = (String, NaiveDate, NaiveDate);

#[derive(Default)]
pub struct MemoryCdrStore {
    records: RwLock<HashMap<PeriodKey, CdrRecord>>,
}

impl MemoryCdrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn in_window(
    record: &CdrRecord,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> bool {
    from.map_or(true, |f| record.period_from >= f) && to.map_or(true, |t| record.period_to <= t)
}

#[async_trait]
impl CdrRepository for MemoryCdrStore {
    async fn save(&self, report: &CostedReport, regenerate: bool) -> Result<CdrSave, CdrError> {
        let key = (
            report.organization_id.clone(),
            report.period_from,
            report.period_to,
        );
        let now = Utc::now();
        let mut records = self.records.write().await;

        match records.get_mut(&key) {
            Some(existing) if !regenerate => Err(CdrError::Duplicate {
                organization_id: existing.organization_id.clone(),
                from: existing.period_from,
                to: existing.period_to,
            }),
            Some(existing) => {
                let previous_net_cost = existing.net_cost;
                existing.net_cost = report.net_cost;
                existing.report = report.clone();
                existing.updated_utc = now;
                Ok(CdrSave::Replaced {
                    record: existing.clone(),
                    previous_net_cost,
                })
            }
            None => {
                let record = CdrRecord {
                    cdr_id: Uuid::new_v4(),
                    organization_id: report.organization_id.clone(),
                    period_from: report.period_from,
                    period_to: report.period_to,
                    net_cost: report.net_cost,
                    report: report.clone(),
                    created_utc: now,
                    updated_utc: now,
                };
                records.insert(key, record.clone());
                Ok(CdrSave::Created(record))
            }
        }
    }

    async fn list(
        &self,
        organization_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CdrRecord>, CdrError> {
        let records = self.records.read().await;
        let mut matching: Vec<CdrRecord> = records
            .values()
            .filter(|r| r.organization_id == organization_id && in_window(r, from, to))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.period_from, r.period_to));
        Ok(matching)
    }

    async fn health_check(&self) -> Result<(), CdrError> {
        Ok(())
    }
}
