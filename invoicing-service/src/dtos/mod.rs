//! Request bodies for the invoicing API.

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{OrganizationType, Period};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateInvoiceRequest {
    pub organization_type: OrganizationType,
    #[validate(length(min = 1, max = 128))]
    pub organization_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl GenerateInvoiceRequest {
    pub fn period(&self) -> Period {
        Period::new(self.from, self.to)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PeriodicRequest {
    /// Defaults to today.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RerunRequest {
    #[serde(default)]
    pub bill_run_id: Option<Uuid>,
    #[serde(default)]
    #[validate(range(min = 1, max = 120))]
    pub months: Option<u32>,
}
