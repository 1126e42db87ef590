//! Catalog records served by the plan manager and customer registries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved plan id that is always offered and terminates plan fallback.
pub const DEFAULT_PLAN_ID: &str = "DEFAULT";

/// Bundle SKU carrying the vCPU allocation of a flavor.
pub const VCPU_SKU: &str = "vcpu";

/// Bundle SKU carrying per-vCPU operating system licenses.
pub const LICENSE_SKU: &str = "license";

/// Pricing agreement: per-SKU unit prices, an offer window and an overall
/// discount applied on top of the per-SKU discounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub discount: f64,
    pub offered_start_date: NaiveDate,
    pub offered_end_date: NaiveDate,
    #[serde(default)]
    pub sku_prices: Vec<SkuPrice>,
}

impl Plan {
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_PLAN_ID
    }

    /// Whether the plan can be used to price usage on `day`.
    ///
    /// The window is half-open: `[offered_start_date, offered_end_date)`.
    /// The default plan is always offered.
    pub fn is_offered_on(&self, day: NaiveDate) -> bool {
        self.is_default() || (self.offered_start_date <= day && day < self.offered_end_date)
    }

    pub fn price_for(&self, sku_id: &str) -> Option<&SkuPrice> {
        self.sku_prices.iter().find(|p| p.sku_id == sku_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuPrice {
    pub sku_id: String,
    pub unit_price: f64,
    #[serde(default)]
    pub discount: f64,
}

/// Billable catalog item (vCPU-hour, GB-month, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sku {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Lifecycle state of one resource type and the SKU multipliers that convert
/// time spent in that state into billable quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    pub resource_type: String,
    pub state: String,
    #[serde(default)]
    pub sku_list: BTreeMap<String, f64>,
}

/// Fixed sub-SKU quantities bundled into one parent resource, keyed by flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuBundle {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sku_prices: BTreeMap<String, f64>,
}

fn default_invoice_period() -> String {
    "monthly".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reseller_id: Option<String>,
    #[serde(default = "default_invoice_period")]
    pub invoice_period: String,
    #[serde(default = "default_true")]
    pub billable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reseller {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default = "default_invoice_period")]
    pub invoice_period: String,
    #[serde(default = "default_true")]
    pub billable: bool,
}

/// A customer's account/project whose usage is reported separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}
