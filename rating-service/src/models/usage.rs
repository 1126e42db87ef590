//! Raw usage reports (UDRs) as produced by the state/history engine.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Per-organization usage for one period. Immutable input to rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub organization_id: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    #[serde(default)]
    pub entries: Vec<UsageEntry>,
}

impl UsageReport {
    pub fn empty(organization_id: impl Into<String>, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            organization_id: organization_id.into(),
            period_from: from,
            period_to: to,
            entries: Vec::new(),
        }
    }
}

/// Accumulated usage of one resource, broken up by lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: String,
    pub resource_type: String,
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub usage_breakup: BTreeMap<String, f64>,
    #[serde(default)]
    pub unit: String,
}

/// Resource metadata with the fields rating depends on promoted to typed
/// fields. Anything else the collectors attach is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(rename = "flavorId", default, skip_serializing_if = "Option::is_none")]
    pub flavor_id: Option<String>,
    #[serde(rename = "imageName", default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "PlanOverride", default, skip_serializing_if = "is_false")]
    pub plan_override: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResourceMetadata {
    /// Stable textual identity used to recognise the same resource reported
    /// by several products.
    pub fn identity(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_windows_image(&self) -> bool {
        self.image_name
            .as_deref()
            .map(|name| name.to_lowercase().contains("windows"))
            .unwrap_or(false)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Collectors report sizes as integers, floats or strings depending on the
/// resource driver.
fn lenient_size<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}
