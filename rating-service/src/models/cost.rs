//! Rated usage (CDRs): usage entries with their cost breakdown attached.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ResourceMetadata, UsageEntry};
use crate::rounding::Rounder;

/// One SKU charged for one lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostLine {
    pub sku: String,
    pub sku_state: String,
    pub sku_cost: f64,
    pub sku_discount: f64,
    pub sku_net: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    pub cost_breakup: Vec<CostLine>,
    pub total_from_sku: f64,
    pub applied_discount: f64,
    pub net_total: f64,
}

impl Cost {
    pub(crate) fn round(&mut self, rounder: &Rounder) {
        for line in &mut self.cost_breakup {
            line.sku_cost = rounder.round(line.sku_cost);
            line.sku_discount = rounder.round(line.sku_discount);
            line.sku_net = rounder.round(line.sku_net);
        }
        self.total_from_sku = rounder.round(self.total_from_sku);
        self.applied_discount = rounder.round(self.applied_discount);
        self.net_total = rounder.round(self.net_total);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostedUsage {
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: String,
    pub metadata: ResourceMetadata,
    pub usage_breakup: BTreeMap<String, f64>,
    pub unit: String,
    /// Plan that priced this entry after fallback.
    pub plan_id: String,
    pub cost: Cost,
}

impl CostedUsage {
    pub fn from_entry(entry: &UsageEntry, plan_id: &str, cost: Cost) -> Self {
        Self {
            resource_id: entry.resource_id.clone(),
            resource_name: entry.resource_name.clone(),
            resource_type: entry.resource_type.clone(),
            metadata: entry.metadata.clone(),
            usage_breakup: entry.usage_breakup.clone(),
            unit: entry.unit.clone(),
            plan_id: plan_id.to_string(),
            cost,
        }
    }

    /// Identity of the underlying resource: id, name and metadata.
    pub fn resource_key(&self) -> (String, String, String) {
        (
            self.resource_id.clone(),
            self.resource_name.clone(),
            self.metadata.identity(),
        )
    }

    /// Fold another contribution for the same resource into this one: usage is
    /// summed per state and cost lines are summed per (sku, state).
    pub fn absorb(&mut self, other: &CostedUsage, rounder: &Rounder) {
        for (state, amount) in &other.usage_breakup {
            *self.usage_breakup.entry(state.clone()).or_insert(0.0) += amount;
        }

        for line in &other.cost.cost_breakup {
            match self
                .cost
                .cost_breakup
                .iter_mut()
                .find(|l| l.sku == line.sku && l.sku_state == line.sku_state)
            {
                Some(existing) => {
                    existing.sku_cost += line.sku_cost;
                    existing.sku_discount += line.sku_discount;
                    existing.sku_net += line.sku_net;
                }
                None => self.cost.cost_breakup.push(line.clone()),
            }
        }

        self.cost.total_from_sku += other.cost.total_from_sku;
        self.cost.applied_discount += other.cost.applied_discount;
        self.cost.net_total += other.cost.net_total;
        self.cost.round(rounder);
    }
}

/// Priced usage report for one organization and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostedReport {
    pub organization_id: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    /// Sum of every entry's net total.
    pub net_cost: f64,
    pub usage: Vec<CostedUsage>,
}
