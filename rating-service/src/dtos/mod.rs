//! Request and response bodies for the rating API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{CdrSave, CostedReport, UsageReport};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RateRequest {
    #[validate(custom(function = "validate_report"))]
    pub report: UsageReport,
    #[validate(length(min = 1, max = 128))]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub regenerate: bool,
}

fn validate_report(report: &UsageReport) -> Result<(), ValidationError> {
    if report.organization_id.trim().is_empty() {
        return Err(ValidationError::new("organization_id_required"));
    }
    if report.period_from >= report.period_to {
        return Err(ValidationError::new("period_from_must_precede_period_to"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateResponse {
    pub cdr_id: Uuid,
    /// True when an earlier rating of the same period was replaced.
    pub replaced: bool,
    pub report: CostedReport,
}

impl RateResponse {
    pub fn new(report: CostedReport, saved: &CdrSave) -> Self {
        Self {
            cdr_id: saved.record().cdr_id,
            replaced: matches!(saved, CdrSave::Replaced { .. }),
            report,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CdrListParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(org: &str, from: &str, to: &str) -> RateRequest {
        RateRequest {
            report: UsageReport::empty(org, from.parse().unwrap(), to.parse().unwrap()),
            plan_id: None,
            regenerate: false,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request("org-1", "2024-05-01", "2024-06-01").validate().is_ok());
    }

    #[test]
    fn test_inverted_period_is_rejected() {
        assert!(request("org-1", "2024-06-01", "2024-05-01").validate().is_err());
    }

    #[test]
    fn test_blank_organization_is_rejected() {
        assert!(request("  ", "2024-05-01", "2024-06-01").validate().is_err());
    }

    #[test]
    fn test_empty_plan_id_is_rejected() {
        let mut req = request("org-1", "2024-05-01", "2024-06-01");
        req.plan_id = Some(String::new());
        assert!(req.validate().is_err());
    }
}
