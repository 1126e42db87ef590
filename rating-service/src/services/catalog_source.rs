//! Catalog sources: where plans, SKUs, cycles, bundles, organizations and raw
//! usage reports come from.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::models::{
    Customer, Cycle, Plan, Product, Reseller, Sku, SkuBundle, UsageReport,
};

/// Record kinds the catalog serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Plan,
    Sku,
    Cycle,
    Bundle,
    Customer,
    Reseller,
    Product,
    Usage,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Plan => "plan",
            CatalogKind::Sku => "sku",
            CatalogKind::Cycle => "cycle",
            CatalogKind::Bundle => "bundle",
            CatalogKind::Customer => "customer",
            CatalogKind::Reseller => "reseller",
            CatalogKind::Product => "product",
            CatalogKind::Usage => "usage",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to look up. `All` is the `"ALL"` collection lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogQuery {
    All(CatalogKind),
    One(CatalogKind, String),
    Usage {
        product_id: String,
        from: NaiveDate,
        to: NaiveDate,
    },
}

impl CatalogQuery {
    pub fn kind(&self) -> CatalogKind {
        match self {
            CatalogQuery::All(kind) | CatalogQuery::One(kind, _) => *kind,
            CatalogQuery::Usage { .. } => CatalogKind::Usage,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CatalogQuery::All(_) => "ALL".to_string(),
            CatalogQuery::One(_, id) => id.clone(),
            CatalogQuery::Usage {
                product_id,
                from,
                to,
            } => format!("{}[{}..{})", product_id, from, to),
        }
    }
}

/// A catalog record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum CatalogRecord {
    Plan(Plan),
    Sku(Sku),
    Cycle(Cycle),
    Bundle(SkuBundle),
    Customer(Customer),
    Reseller(Reseller),
    Product(Product),
    Usage(UsageReport),
}

impl CatalogRecord {
    pub fn kind(&self) -> CatalogKind {
        match self {
            CatalogRecord::Plan(_) => CatalogKind::Plan,
            CatalogRecord::Sku(_) => CatalogKind::Sku,
            CatalogRecord::Cycle(_) => CatalogKind::Cycle,
            CatalogRecord::Bundle(_) => CatalogKind::Bundle,
            CatalogRecord::Customer(_) => CatalogKind::Customer,
            CatalogRecord::Reseller(_) => CatalogKind::Reseller,
            CatalogRecord::Product(_) => CatalogKind::Product,
            CatalogRecord::Usage(_) => CatalogKind::Usage,
        }
    }
}

/// Result of a catalog query.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLookup {
    One(CatalogRecord),
    All(Vec<CatalogRecord>),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: CatalogKind, id: String },

    #[error("{kind} lookup failed: {reason}")]
    Unavailable { kind: CatalogKind, reason: String },

    #[error("{kind} lookup returned an unexpected record")]
    UnexpectedRecord { kind: CatalogKind },

    #[error("invalid catalog snapshot: {0}")]
    Snapshot(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }
}

/// Backend behind the catalog cache.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self, query: &CatalogQuery, token: &str) -> Result<CatalogLookup, CatalogError>;
}

/// Usage report stored for one product in a static snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUsage {
    pub product_id: String,
    pub report: UsageReport,
}

/// In-memory catalog snapshot. Used for local runs (loaded from a JSON file)
/// and in tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticCatalog {
    pub plans: Vec<Plan>,
    pub skus: Vec<Sku>,
    pub cycles: Vec<Cycle>,
    pub bundles: Vec<SkuBundle>,
    pub customers: Vec<Customer>,
    pub resellers: Vec<Reseller>,
    pub products: Vec<Product>,
    pub usage: Vec<ProductUsage>,
}

impl StaticCatalog {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Snapshot(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Snapshot(format!("{}: {}", path.display(), e)))
    }

    fn all(&self, kind: CatalogKind) -> Vec<CatalogRecord> {
        match kind {
            CatalogKind::Plan => self.plans.iter().cloned().map(CatalogRecord::Plan).collect(),
            CatalogKind::Sku => self.skus.iter().cloned().map(CatalogRecord::Sku).collect(),
            CatalogKind::Cycle => self.cycles.iter().cloned().map(CatalogRecord::Cycle).collect(),
            CatalogKind::Bundle => self.bundles.iter().cloned().map(CatalogRecord::Bundle).collect(),
            CatalogKind::Customer => self
                .customers
                .iter()
                .cloned()
                .map(CatalogRecord::Customer)
                .collect(),
            CatalogKind::Reseller => self
                .resellers
                .iter()
                .cloned()
                .map(CatalogRecord::Reseller)
                .collect(),
            CatalogKind::Product => self
                .products
                .iter()
                .cloned()
                .map(CatalogRecord::Product)
                .collect(),
            CatalogKind::Usage => self
                .usage
                .iter()
                .map(|u| CatalogRecord::Usage(u.report.clone()))
                .collect(),
        }
    }

    fn one(&self, kind: CatalogKind, id: &str) -> Option<CatalogRecord> {
        match kind {
            CatalogKind::Plan => self.plans.iter().find(|p| p.id == id).cloned().map(CatalogRecord::Plan),
            CatalogKind::Sku => self.skus.iter().find(|s| s.id == id).cloned().map(CatalogRecord::Sku),
            CatalogKind::Cycle => self.cycles.iter().find(|c| c.id == id).cloned().map(CatalogRecord::Cycle),
            CatalogKind::Bundle => self
                .bundles
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .map(CatalogRecord::Bundle),
            CatalogKind::Customer => self
                .customers
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .map(CatalogRecord::Customer),
            CatalogKind::Reseller => self
                .resellers
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .map(CatalogRecord::Reseller),
            CatalogKind::Product => self
                .products
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .map(CatalogRecord::Product),
            CatalogKind::Usage => None,
        }
    }

    fn usage_for(&self, product_id: &str, from: NaiveDate, to: NaiveDate) -> UsageReport {
        self.usage
            .iter()
            .find(|u| {
                u.product_id == product_id && u.report.period_from == from && u.report.period_to == to
            })
            .map(|u| u.report.clone())
            .unwrap_or_else(|| {
                let organization = self
                    .products
                    .iter()
                    .find(|p| p.id == product_id)
                    .map(|p| p.customer_id.clone())
                    .unwrap_or_else(|| product_id.to_string());
                UsageReport::empty(organization, from, to)
            })
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch(&self, query: &CatalogQuery, _token: &str) -> Result<CatalogLookup, CatalogError> {
        match query {
            CatalogQuery::All(kind) => Ok(CatalogLookup::All(self.all(*kind))),
            CatalogQuery::One(kind, id) => {
                self.one(*kind, id)
                    .map(CatalogLookup::One)
                    .ok_or_else(|| CatalogError::NotFound {
                        kind: *kind,
                        id: id.clone(),
                    })
            }
            CatalogQuery::Usage {
                product_id,
                from,
                to,
            } => Ok(CatalogLookup::One(CatalogRecord::Usage(
                self.usage_for(product_id, *from, *to),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StaticCatalog {
        StaticCatalog {
            skus: vec![Sku {
                id: "sku-1".to_string(),
                name: "vcpu".to_string(),
                unit: None,
            }],
            products: vec![Product {
                id: "p1".to_string(),
                name: "project".to_string(),
                customer_id: "c1".to_string(),
                plan_id: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_lookup_reports_missing_ids() {
        let catalog = snapshot();
        let result = catalog
            .fetch(&CatalogQuery::One(CatalogKind::Sku, "nope".to_string()), "")
            .await;
        assert!(matches!(result, Err(CatalogError::NotFound { kind: CatalogKind::Sku, .. })));
    }

    #[tokio::test]
    async fn test_missing_usage_is_an_empty_report_for_the_owner() {
        let catalog = snapshot();
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let lookup = catalog
            .fetch(
                &CatalogQuery::Usage {
                    product_id: "p1".to_string(),
                    from,
                    to,
                },
                "",
            )
            .await
            .unwrap();

        match lookup {
            CatalogLookup::One(CatalogRecord::Usage(report)) => {
                assert_eq!(report.organization_id, "c1");
                assert!(report.entries.is_empty());
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_parses_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"skus": [{"id": "s1", "name": "vcpu"}], "cycles": [{"id": "c1", "resourceType": "vm", "state": "active", "skuList": {"vcpu": 1}}]}"#,
        )
        .unwrap();

        let catalog = StaticCatalog::from_json_file(&path).unwrap();
        assert_eq!(catalog.skus.len(), 1);
        assert_eq!(catalog.cycles[0].sku_list["vcpu"], 1.0);
        assert!(catalog.plans.is_empty());
    }
}
