//! Invoice model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rating_service::models::CostedUsage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::Period;

/// Kind of organization an invoice is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    Customer,
    Reseller,
}

impl OrganizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationType::Customer => "customer",
            OrganizationType::Reseller => "reseller",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "reseller" => OrganizationType::Reseller,
            _ => OrganizationType::Customer,
        }
    }
}

impl fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(OrganizationType::Customer),
            "reseller" => Ok(OrganizationType::Reseller),
            _ => Err(format!("Invalid organization type: {}", s)),
        }
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    NotProcessed,
    Processing,
    Finished,
    Error,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::NotProcessed => "NOT_PROCESSED",
            InvoiceStatus::Processing => "PROCESSING",
            InvoiceStatus::Finished => "FINISHED",
            InvoiceStatus::Error => "ERROR",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PROCESSING" => InvoiceStatus::Processing,
            "FINISHED" => InvoiceStatus::Finished,
            "ERROR" => InvoiceStatus::Error,
            _ => InvoiceStatus::NotProcessed,
        }
    }
}

/// Invoice for one organization and billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub bill_run_id: Uuid,
    pub organization_id: String,
    pub organization_type: OrganizationType,
    pub status: InvoiceStatus,
    pub period_start_date: NaiveDate,
    pub period_end_date: NaiveDate,
    pub items: Vec<CostedUsage>,
    pub amount_invoiced: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn new(
        bill_run_id: Uuid,
        organization_id: impl Into<String>,
        organization_type: OrganizationType,
        period: Period,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bill_run_id,
            organization_id: organization_id.into(),
            organization_type,
            status: InvoiceStatus::NotProcessed,
            period_start_date: period.from,
            period_end_date: period.to,
            items: Vec::new(),
            amount_invoiced: 0.0,
            error_message: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn period(&self) -> Period {
        Period::new(self.period_start_date, self.period_end_date)
    }

    pub fn mark_processing(&mut self) {
        self.status = InvoiceStatus::Processing;
        self.error_message = None;
        self.updated_utc = Utc::now();
    }

    pub fn mark_finished(&mut self, items: Vec<CostedUsage>, amount: f64) {
        self.status = InvoiceStatus::Finished;
        self.items = items;
        self.amount_invoiced = amount;
        self.error_message = None;
        self.updated_utc = Utc::now();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = InvoiceStatus::Error;
        self.error_message = Some(message.into());
        self.updated_utc = Utc::now();
    }

    /// Whether a job may take this invoice for pricing. A PROCESSING invoice
    /// last touched before `stale_before` belongs to a job that is gone.
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            InvoiceStatus::NotProcessed | InvoiceStatus::Error => true,
            InvoiceStatus::Processing => self.updated_utc < stale_before,
            InvoiceStatus::Finished => false,
        }
    }

    /// Whether a re-run should resubmit this invoice. NOT_PROCESSED and
    /// PROCESSING invoices still belong to a live job until they go stale.
    pub fn is_rerunnable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            InvoiceStatus::Error => true,
            InvoiceStatus::NotProcessed | InvoiceStatus::Processing => {
                self.updated_utc < stale_before
            }
            InvoiceStatus::Finished => false,
        }
    }
}
