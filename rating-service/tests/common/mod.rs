//! Test helper module for rating-service integration tests.
//!
//! Spawns the service on a random port with an in-memory CDR store and a
//! static catalog snapshot.

#![allow(dead_code)]

use chrono::NaiveDate;
use rating_service::config::{
    CatalogBackend, CatalogConfig, RatingConfig, StoreBackend, StoreConfig,
};
use rating_service::models::{
    Cycle, Plan, ResourceMetadata, Sku, SkuBundle, SkuPrice, UsageEntry, UsageReport,
};
use rating_service::services::{
    LedgerConfig, MemoryCdrStore, RegistryUrls, StaticCatalog,
};
use rating_service::startup::Application;
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

fn plan(id: &str, end: &str, discount: f64, prices: &[(&str, f64)]) -> Plan {
    Plan {
        id: id.to_string(),
        name: id.to_string(),
        discount,
        offered_start_date: date("2020-01-01"),
        offered_end_date: date(end),
        sku_prices: prices
            .iter()
            .map(|(sku, price)| SkuPrice {
                sku_id: sku.to_string(),
                unit_price: *price,
                discount: 0.0,
            })
            .collect(),
    }
}

/// Catalog used by the integration tests.
///
/// `vm` is a bundled resource priced through flavors; `volume` is priced
/// under its own name.
pub fn test_catalog() -> StaticCatalog {
    let cycle = |resource_type: &str, state: &str, skus: &[(&str, f64)]| Cycle {
        id: format!("{}-{}", resource_type, state),
        resource_type: resource_type.to_string(),
        state: state.to_string(),
        sku_list: skus.iter().map(|(n, m)| (n.to_string(), *m)).collect(),
    };
    let sku = |id: &str, name: &str| Sku {
        id: id.to_string(),
        name: name.to_string(),
        unit: None,
    };
    let bundle = |id: &str, prices: &[(&str, f64)]| SkuBundle {
        id: id.to_string(),
        name: id.to_string(),
        sku_prices: prices.iter().map(|(n, q)| (n.to_string(), *q)).collect(),
    };

    StaticCatalog {
        plans: vec![
            plan(
                "DEFAULT",
                "2099-01-01",
                0.0,
                &[("s-vcpu", 1.0), ("s-ram", 0.5), ("s-license", 2.0), ("s-volume", 0.1)],
            ),
            plan("gold", "2030-01-01", 0.5, &[("s-vcpu", 2.0)]),
            plan("legacy", "2023-01-01", 0.0, &[("s-vcpu", 99.0)]),
        ],
        skus: vec![
            sku("s-vcpu", "vcpu"),
            sku("s-ram", "ram"),
            sku("s-license", "license"),
            sku("s-volume", "volume"),
        ],
        cycles: vec![
            cycle("vm", "active", &[("vcpu", 3600.0), ("ram", 3600.0), ("license", 3600.0)]),
            cycle("volume", "active", &[("volume", 1.0)]),
        ],
        bundles: vec![bundle("small", &[("vcpu", 4.0), ("ram", 16.0)])],
        ..Default::default()
    }
}

pub fn vm_entry(id: &str, flavor: &str, image: Option<&str>, hours: f64) -> UsageEntry {
    UsageEntry {
        resource_id: id.to_string(),
        resource_name: id.to_string(),
        resource_type: "vm".to_string(),
        metadata: ResourceMetadata {
            flavor_id: Some(flavor.to_string()),
            image_name: image.map(str::to_string),
            ..Default::default()
        },
        usage_breakup: [("active".to_string(), hours)].into_iter().collect(),
        unit: "h".to_string(),
    }
}

pub fn usage_report(org: &str, entries: Vec<UsageEntry>) -> UsageReport {
    UsageReport {
        organization_id: org.to_string(),
        period_from: date("2024-05-01"),
        period_to: date("2024-06-01"),
        entries,
    }
}

pub fn test_config() -> RatingConfig {
    RatingConfig {
        common: CoreConfig { port: 0 },
        service_name: "rating-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            database: None,
        },
        catalog: CatalogConfig {
            backend: CatalogBackend::Static,
            registries: RegistryUrls {
                plan_manager: "http://127.0.0.1:1".to_string(),
                customer_db: "http://127.0.0.1:1".to_string(),
                udr: "http://127.0.0.1:1".to_string(),
            },
            snapshot_path: None,
            ttl: Duration::from_secs(60),
            request_timeout: Duration::from_secs(1),
        },
        rounding_scaler: 1e7,
        ledger: LedgerConfig {
            url: None,
            capacity: 16,
            timeout: Duration::from_secs(1),
        },
    }
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    pub async fn spawn() -> Self {
        let app = Application::build_with(
            test_config(),
            Arc::new(test_catalog()),
            Arc::new(MemoryCdrStore::new()),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
        }
    }

    pub async fn rate(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/api/v1/rate", self.address))
            .bearer_auth(TEST_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn list_cdrs(&self, organization_id: &str, query: &str) -> reqwest::Response {
        self.client
            .get(format!(
                "{}/api/v1/cdr/{}{}",
                self.address, organization_id, query
            ))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
