//! Catalog source backed by the plan-manager, customer-db and UDR registries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::models::{Customer, Cycle, Plan, Product, Reseller, Sku, SkuBundle, UsageReport};
use crate::services::catalog_source::{
    CatalogError, CatalogKind, CatalogLookup, CatalogQuery, CatalogRecord, CatalogSource,
};

#[derive(Debug, Clone)]
pub struct RegistryUrls {
    pub plan_manager: String,
    pub customer_db: String,
    pub udr: String,
}

pub struct HttpCatalogSource {
    client: reqwest::Client,
    urls: RegistryUrls,
}

impl HttpCatalogSource {
    pub fn new(urls: RegistryUrls, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Unavailable {
                kind: CatalogKind::Plan,
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, urls })
    }

    fn collection(&self, kind: CatalogKind) -> (&str, &'static str) {
        match kind {
            CatalogKind::Plan => (&self.urls.plan_manager, "plans"),
            CatalogKind::Sku => (&self.urls.plan_manager, "skus"),
            CatalogKind::Cycle => (&self.urls.plan_manager, "cycles"),
            CatalogKind::Bundle => (&self.urls.plan_manager, "bundles"),
            CatalogKind::Customer => (&self.urls.customer_db, "customers"),
            CatalogKind::Reseller => (&self.urls.customer_db, "resellers"),
            CatalogKind::Product => (&self.urls.customer_db, "products"),
            CatalogKind::Usage => (&self.urls.udr, "usage"),
        }
    }

    fn request(&self, query: &CatalogQuery) -> reqwest::RequestBuilder {
        let (base, collection) = self.collection(query.kind());
        let base = base.trim_end_matches('/');
        match query {
            CatalogQuery::All(_) => self.client.get(format!("{}/api/v1/{}", base, collection)),
            CatalogQuery::One(_, id) => self
                .client
                .get(format!("{}/api/v1/{}/{}", base, collection, id)),
            CatalogQuery::Usage {
                product_id,
                from,
                to,
            } => self
                .client
                .get(format!("{}/api/v1/{}/{}", base, collection, product_id))
                .query(&[("from", from.to_string()), ("to", to.to_string())]),
        }
    }
}

fn decode<T: DeserializeOwned>(
    kind: CatalogKind,
    value: serde_json::Value,
) -> Result<T, CatalogError> {
    serde_json::from_value(value).map_err(|e| CatalogError::Unavailable {
        kind,
        reason: format!("malformed response: {}", e),
    })
}

fn decode_record(kind: CatalogKind, value: serde_json::Value) -> Result<CatalogRecord, CatalogError> {
    Ok(match kind {
        CatalogKind::Plan => CatalogRecord::Plan(decode::<Plan>(kind, value)?),
        CatalogKind::Sku => CatalogRecord::Sku(decode::<Sku>(kind, value)?),
        CatalogKind::Cycle => CatalogRecord::Cycle(decode::<Cycle>(kind, value)?),
        CatalogKind::Bundle => CatalogRecord::Bundle(decode::<SkuBundle>(kind, value)?),
        CatalogKind::Customer => CatalogRecord::Customer(decode::<Customer>(kind, value)?),
        CatalogKind::Reseller => CatalogRecord::Reseller(decode::<Reseller>(kind, value)?),
        CatalogKind::Product => CatalogRecord::Product(decode::<Product>(kind, value)?),
        CatalogKind::Usage => CatalogRecord::Usage(decode::<UsageReport>(kind, value)?),
    })
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&self, query: &CatalogQuery, token: &str) -> Result<CatalogLookup, CatalogError> {
        let kind = query.kind();
        let mut request = self.request(query);
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        tracing::debug!(kind = %kind, id = %query.describe(), "Fetching catalog record");

        let response = request.send().await.map_err(|e| CatalogError::Unavailable {
            kind,
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound {
                kind,
                id: query.describe(),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable {
                kind,
                reason: format!("registry responded with {}", status),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| CatalogError::Unavailable {
                kind,
                reason: format!("unreadable response: {}", e),
            })?;

        match query {
            CatalogQuery::All(_) => {
                let items: Vec<serde_json::Value> = decode(kind, body)?;
                let records = items
                    .into_iter()
                    .map(|item| decode_record(kind, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CatalogLookup::All(records))
            }
            CatalogQuery::One(..) | CatalogQuery::Usage { .. } => {
                Ok(CatalogLookup::One(decode_record(kind, body)?))
            }
        }
    }
}
