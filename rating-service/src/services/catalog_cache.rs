//! TTL cache in front of a catalog source.
//!
//! Entries are keyed by (query, auth token) so that a token only ever sees
//! what the registries returned for it. Reads are lock-free per shard
//! (`DashMap`); a miss fetches outside any lock and the fresh value replaces
//! whatever is there, so concurrent refreshes of the same key are harmless.

use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{Customer, Cycle, Plan, Product, Reseller, Sku, SkuBundle, UsageReport};
use crate::services::catalog_source::{
    CatalogError, CatalogKind, CatalogLookup, CatalogQuery, CatalogRecord, CatalogSource,
};
use crate::services::metrics::record_catalog_lookup;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: CatalogQuery,
    token: String,
}

struct CacheEntry {
    value: Arc<CatalogLookup>,
    fetched_at: Instant,
}

pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Raw lookup; most callers want one of the typed helpers below.
    pub async fn get(
        &self,
        query: CatalogQuery,
        token: &str,
    ) -> Result<Arc<CatalogLookup>, CatalogError> {
        let key = CacheKey {
            query,
            token: token.to_string(),
        };
        let kind = key.query.kind();

        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                record_catalog_lookup(kind.as_str(), "hit");
                return Ok(entry.value.clone());
            }
        }

        let fetched = self.source.fetch(&key.query, token).await;
        let value = match fetched {
            Ok(lookup) => Arc::new(lookup),
            Err(e) => {
                record_catalog_lookup(kind.as_str(), "error");
                return Err(e);
            }
        };

        record_catalog_lookup(kind.as_str(), "miss");
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(value)
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn one<T>(
        &self,
        kind: CatalogKind,
        id: &str,
        token: &str,
        pick: impl Fn(&CatalogRecord) -> Option<&T>,
    ) -> Result<T, CatalogError>
    where
        T: Clone,
    {
        let lookup = self
            .get(CatalogQuery::One(kind, id.to_string()), token)
            .await?;
        match &*lookup {
            CatalogLookup::One(record) => pick(record)
                .cloned()
                .ok_or(CatalogError::UnexpectedRecord { kind }),
            CatalogLookup::All(_) => Err(CatalogError::UnexpectedRecord { kind }),
        }
    }

    async fn all<T>(
        &self,
        kind: CatalogKind,
        token: &str,
        pick: impl Fn(&CatalogRecord) -> Option<&T>,
    ) -> Result<Vec<T>, CatalogError>
    where
        T: Clone,
    {
        let lookup = self.get(CatalogQuery::All(kind), token).await?;
        match &*lookup {
            CatalogLookup::All(records) => records
                .iter()
                .map(|r| pick(r).cloned().ok_or(CatalogError::UnexpectedRecord { kind }))
                .collect(),
            CatalogLookup::One(_) => Err(CatalogError::UnexpectedRecord { kind }),
        }
    }

    pub async fn plan(&self, id: &str, token: &str) -> Result<Plan, CatalogError> {
        self.one(CatalogKind::Plan, id, token, |r| match r {
            CatalogRecord::Plan(p) => Some(p),
            _ => None,
        })
        .await
    }

    pub async fn skus(&self, token: &str) -> Result<Vec<Sku>, CatalogError> {
        self.all(CatalogKind::Sku, token, |r| match r {
            CatalogRecord::Sku(s) => Some(s),
            _ => None,
        })
        .await
    }

    pub async fn sku_by_name(&self, name: &str, token: &str) -> Result<Sku, CatalogError> {
        self.skus(token)
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CatalogError::NotFound {
                kind: CatalogKind::Sku,
                id: name.to_string(),
            })
    }

    /// Every lifecycle state defined for `resource_type`, in catalog order.
    /// A resource type without cycles cannot be rated.
    pub async fn cycles_for(
        &self,
        resource_type: &str,
        token: &str,
    ) -> Result<Vec<Cycle>, CatalogError> {
        let cycles: Vec<Cycle> = self
            .all(CatalogKind::Cycle, token, |r| match r {
                CatalogRecord::Cycle(c) => Some(c),
                _ => None,
            })
            .await?
            .into_iter()
            .filter(|c| c.resource_type == resource_type)
            .collect();

        if cycles.is_empty() {
            return Err(CatalogError::NotFound {
                kind: CatalogKind::Cycle,
                id: resource_type.to_string(),
            });
        }
        Ok(cycles)
    }

    pub async fn bundle(&self, id: &str, token: &str) -> Result<SkuBundle, CatalogError> {
        self.one(CatalogKind::Bundle, id, token, |r| match r {
            CatalogRecord::Bundle(b) => Some(b),
            _ => None,
        })
        .await
    }

    pub async fn customer(&self, id: &str, token: &str) -> Result<Customer, CatalogError> {
        self.one(CatalogKind::Customer, id, token, |r| match r {
            CatalogRecord::Customer(c) => Some(c),
            _ => None,
        })
        .await
    }

    pub async fn customers(&self, token: &str) -> Result<Vec<Customer>, CatalogError> {
        self.all(CatalogKind::Customer, token, |r| match r {
            CatalogRecord::Customer(c) => Some(c),
            _ => None,
        })
        .await
    }

    pub async fn reseller(&self, id: &str, token: &str) -> Result<Reseller, CatalogError> {
        self.one(CatalogKind::Reseller, id, token, |r| match r {
            CatalogRecord::Reseller(r) => Some(r),
            _ => None,
        })
        .await
    }

    pub async fn resellers(&self, token: &str) -> Result<Vec<Reseller>, CatalogError> {
        self.all(CatalogKind::Reseller, token, |r| match r {
            CatalogRecord::Reseller(r) => Some(r),
            _ => None,
        })
        .await
    }

    pub async fn products_of(
        &self,
        customer_id: &str,
        token: &str,
    ) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .all(CatalogKind::Product, token, |r| match r {
                CatalogRecord::Product(p) => Some(p),
                _ => None,
            })
            .await?
            .into_iter()
            .filter(|p| p.customer_id == customer_id)
            .collect())
    }

    /// Raw usage of one product for a period. Products that reported nothing
    /// yield an empty report.
    pub async fn usage_report(
        &self,
        product_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        token: &str,
    ) -> Result<UsageReport, CatalogError> {
        let query = CatalogQuery::Usage {
            product_id: product_id.to_string(),
            from,
            to,
        };
        let lookup = match self.get(query, token).await {
            Ok(lookup) => lookup,
            Err(e) if e.is_not_found() => {
                tracing::debug!(product_id = %product_id, "No usage reported for product");
                return Ok(UsageReport::empty(product_id, from, to));
            }
            Err(e) => return Err(e),
        };

        match &*lookup {
            CatalogLookup::One(CatalogRecord::Usage(report)) => Ok(report.clone()),
            _ => Err(CatalogError::UnexpectedRecord {
                kind: CatalogKind::Usage,
            }),
        }
    }
}
