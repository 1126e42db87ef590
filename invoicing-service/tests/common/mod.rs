//! Test helper module for invoicing-service integration tests.
//!
//! Spawns the service on a random port with in-memory stores and a static
//! catalog snapshot.

#![allow(dead_code)]

use chrono::NaiveDate;
use invoicing_service::config::InvoicingConfig;
use invoicing_service::services::{MemoryStore, SchedulerConfig};
use invoicing_service::startup::Application;
use invoicing_service::workers::PoolConfig;
use rating_service::config::{CatalogBackend, CatalogConfig, StoreBackend, StoreConfig};
use rating_service::models::{
    Customer, Cycle, Plan, Product, Reseller, Sku, SkuPrice, UsageEntry, UsageReport,
};
use rating_service::services::catalog_source::ProductUsage;
use rating_service::services::{LedgerConfig, MemoryCdrStore, RegistryUrls, StaticCatalog};
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

fn customer(id: &str, reseller: Option<&str>, period: &str, billable: bool) -> Customer {
    Customer {
        id: id.to_string(),
        name: id.to_string(),
        plan_id: None,
        reseller_id: reseller.map(str::to_string),
        invoice_period: period.to_string(),
        billable,
    }
}

fn product(id: &str, customer_id: &str) -> Product {
    Product {
        id: id.to_string(),
        name: id.to_string(),
        customer_id: customer_id.to_string(),
        plan_id: None,
    }
}

fn usage(product_id: &str, resource_type: &str, resource: &str, hours: f64) -> ProductUsage {
    ProductUsage {
        product_id: product_id.to_string(),
        report: UsageReport {
            organization_id: product_id.to_string(),
            period_from: date("2024-05-01"),
            period_to: date("2024-06-01"),
            entries: vec![UsageEntry {
                resource_id: resource.to_string(),
                resource_name: resource.to_string(),
                resource_type: resource_type.to_string(),
                metadata: Default::default(),
                usage_breakup: [("active".to_string(), hours)].into_iter().collect(),
                unit: "h".to_string(),
            }],
        },
    }
}

/// Catalog used by the integration tests. Every priced resource is a volume
/// at 0.5 per hour, all usage is for May 2024.
///
/// * `acme`: direct customer, two products sharing one volume (40h).
/// * `res-1`: reseller of `beta` (4h) and `gamma` (6h).
/// * `broken`: direct customer whose usage has no lifecycle, so pricing fails.
/// * `dormant`: not billable. `odd`: unknown invoice period.
pub fn test_catalog() -> StaticCatalog {
    StaticCatalog {
        plans: vec![Plan {
            id: "DEFAULT".to_string(),
            name: "Default".to_string(),
            discount: 0.0,
            offered_start_date: date("2020-01-01"),
            offered_end_date: date("2099-01-01"),
            sku_prices: vec![SkuPrice {
                sku_id: "s-volume".to_string(),
                unit_price: 0.5,
                discount: 0.0,
            }],
        }],
        skus: vec![Sku {
            id: "s-volume".to_string(),
            name: "volume".to_string(),
            unit: None,
        }],
        cycles: vec![Cycle {
            id: "volume-active".to_string(),
            resource_type: "volume".to_string(),
            state: "active".to_string(),
            sku_list: [("volume".to_string(), 1.0)].into_iter().collect(),
        }],
        customers: vec![
            customer("acme", None, "monthly", true),
            customer("beta", Some("res-1"), "monthly", true),
            customer("gamma", Some("res-1"), "monthly", true),
            customer("broken", None, "monthly", true),
            customer("dormant", None, "monthly", false),
            customer("odd", None, "fortnightly", true),
        ],
        resellers: vec![Reseller {
            id: "res-1".to_string(),
            name: "Reseller One".to_string(),
            plan_id: None,
            invoice_period: "monthly".to_string(),
            billable: true,
        }],
        products: vec![
            product("acme-p1", "acme"),
            product("acme-p2", "acme"),
            product("beta-p1", "beta"),
            product("gamma-p1", "gamma"),
            product("broken-p1", "broken"),
            product("dormant-p1", "dormant"),
        ],
        usage: vec![
            usage("acme-p1", "volume", "vol-1", 10.0),
            usage("acme-p2", "volume", "vol-1", 30.0),
            usage("beta-p1", "volume", "vol-b", 4.0),
            usage("gamma-p1", "volume", "vol-g", 6.0),
            usage("broken-p1", "gpu", "gpu-1", 1.0),
            usage("dormant-p1", "volume", "vol-d", 100.0),
        ],
        ..Default::default()
    }
}

pub fn test_config() -> InvoicingConfig {
    InvoicingConfig {
        common: CoreConfig { port: 0 },
        service_name: "invoicing-service-test".to_string(),
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
        pool: PoolConfig {
            worker_count: 2,
            max_queue_size: 16,
        },
        job_timeout: Duration::from_secs(10),
        scheduler: SchedulerConfig::default(),
        rerun_lookback_months: 1,
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
            Arc::new(MemoryStore::new()),
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

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(TEST_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn generate(&self, org_type: &str, org_id: &str, from: &str, to: &str) -> reqwest::Response {
        self.post(
            "/api/v1/invoices/generate",
            serde_json::json!({
                "organization_type": org_type,
                "organization_id": org_id,
                "from": from,
                "to": to,
            }),
        )
        .await
    }

    pub async fn bill_run(&self, id: &str) -> Value {
        self.get(&format!("/api/v1/billruns/{}", id))
            .await
            .json()
            .await
            .expect("bill run body")
    }

    /// Poll a bill run until it reaches FINISHED or ERROR.
    pub async fn wait_for_bill_run(&self, id: &str) -> Value {
        for _ in 0..100 {
            let run = self.bill_run(id).await;
            if run["status"] == "FINISHED" || run["status"] == "ERROR" {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("bill run {} did not complete", id);
    }

    /// Wait until the worker pool has no running generation.
    pub async fn wait_for_idle_pool(&self) {
        for _ in 0..100 {
            let health: Value = self.get("/health").await.json().await.expect("health body");
            if health["pool_active"] == false {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("worker pool did not drain");
    }
}
