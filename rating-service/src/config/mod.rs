//! Configuration module for rating-service.

use service_core::config::{self as core_config, env_or, env_parse, env_parse_opt};
use service_core::error::AppError;
use std::str::FromStr;
use std::time::Duration;

use crate::rounding::DEFAULT_SCALER;
use crate::services::catalog_http::RegistryUrls;
use crate::services::ledger::LedgerConfig;

#[derive(Debug, Clone)]
pub struct RatingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub rounding_scaler: f64,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl StoreConfig {
    /// `STORE_BACKEND` plus, for Postgres, the `DATABASE_*` settings.
    pub fn from_env() -> Result<Self, AppError> {
        let backend: StoreBackend = env_parse("STORE_BACKEND", StoreBackend::Postgres)?;
        let database = match backend {
            StoreBackend::Memory => None,
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: std::env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
        };
        Ok(Self { backend, database })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogBackend {
    Http,
    Static,
}

impl FromStr for CatalogBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(CatalogBackend::Http),
            "static" => Ok(CatalogBackend::Static),
            _ => Err(format!("Invalid catalog backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub backend: CatalogBackend,
    pub registries: RegistryUrls,
    /// JSON snapshot used by the static backend.
    pub snapshot_path: Option<String>,
    pub ttl: Duration,
    pub request_timeout: Duration,
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let backend: CatalogBackend = env_parse("CATALOG_BACKEND", CatalogBackend::Http)?;
        let snapshot_path: Option<String> = env_parse_opt("CATALOG_SNAPSHOT_PATH")?;
        if backend == CatalogBackend::Static && snapshot_path.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CATALOG_SNAPSHOT_PATH is required for the static catalog backend"
            )));
        }

        Ok(Self {
            backend,
            registries: RegistryUrls {
                plan_manager: env_or("PLAN_MANAGER_URL", "http://plan-manager:8080"),
                customer_db: env_or("CUSTOMER_DB_URL", "http://customer-db:8080"),
                udr: env_or("UDR_URL", "http://udr:8080"),
            },
            snapshot_path,
            ttl: Duration::from_secs(env_parse("CATALOG_TTL_SECS", 300)?),
            request_timeout: Duration::from_secs(env_parse("CATALOG_TIMEOUT_SECS", 10)?),
        })
    }
}

impl RatingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "rating-service"),
            service_version: env_or("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env_parse_opt("OTLP_ENDPOINT")?,
            store: StoreConfig::from_env()?,
            catalog: CatalogConfig::from_env()?,
            rounding_scaler: env_parse("ROUNDING_SCALER", DEFAULT_SCALER)?,
            ledger: LedgerConfig {
                url: env_parse_opt("CREDIT_LEDGER_URL")?,
                capacity: env_parse("LEDGER_QUEUE_SIZE", 1024)?,
                timeout: Duration::from_secs(env_parse("LEDGER_TIMEOUT_SECS", 5)?),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear() {
        for key in [
            "STORE_BACKEND",
            "DATABASE_URL",
            "CATALOG_BACKEND",
            "CATALOG_SNAPSHOT_PATH",
            "CATALOG_TTL_SECS",
            "ROUNDING_SCALER",
            "CREDIT_LEDGER_URL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_backend_names_parse_case_insensitively() {
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("postgresql".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("STATIC".parse::<CatalogBackend>().unwrap(), CatalogBackend::Static);
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    #[serial]
    fn test_postgres_store_requires_database_url() {
        clear();
        assert!(StoreConfig::from_env().is_err());

        env::set_var("STORE_BACKEND", "memory");
        let store = StoreConfig::from_env().unwrap();
        assert_eq!(store.backend, StoreBackend::Memory);
        assert!(store.database.is_none());
        clear();
    }

    #[test]
    #[serial]
    fn test_static_catalog_requires_snapshot() {
        clear();
        env::set_var("CATALOG_BACKEND", "static");
        assert!(CatalogConfig::from_env().is_err());

        env::set_var("CATALOG_SNAPSHOT_PATH", "/tmp/catalog.json");
        env::set_var("CATALOG_TTL_SECS", "30");
        let catalog = CatalogConfig::from_env().unwrap();
        assert_eq!(catalog.backend, CatalogBackend::Static);
        assert_eq!(catalog.ttl, Duration::from_secs(30));
        clear();
    }

    #[test]
    #[serial]
    fn test_rating_config_defaults() {
        clear();
        env::set_var("STORE_BACKEND", "memory");

        let config = RatingConfig::from_env().unwrap();
        assert_eq!(config.rounding_scaler, DEFAULT_SCALER);
        assert_eq!(config.catalog.backend, CatalogBackend::Http);
        assert!(config.ledger.url.is_none());
        clear();
    }
}
