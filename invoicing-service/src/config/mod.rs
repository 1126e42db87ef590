//! Configuration module for invoicing-service.

use rating_service::config::{CatalogConfig, StoreConfig};
use rating_service::rounding::DEFAULT_SCALER;
use rating_service::services::LedgerConfig;
use service_core::config::{self as core_config, env_or, env_parse, env_parse_opt};
use service_core::error::AppError;
use std::time::Duration;

use crate::services::SchedulerConfig;
use crate::workers::PoolConfig;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub rounding_scaler: f64,
    pub pool: PoolConfig,
    /// Deadline for pricing one invoice.
    pub job_timeout: Duration,
    pub scheduler: SchedulerConfig,
    /// Default lookback of a re-run without a bill run id.
    pub rerun_lookback_months: u32,
    pub ledger: LedgerConfig,
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl InvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let parallelism: usize = env_parse("WORKER_COUNT", available_cpus())?;
        let max_queue_size: usize = env_parse("WORKER_QUEUE_SIZE", 1024)?;
        if max_queue_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "WORKER_QUEUE_SIZE must be at least 1"
            )));
        }

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "invoicing-service"),
            service_version: env_or("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env_parse_opt("OTLP_ENDPOINT")?,
            store: StoreConfig::from_env()?,
            catalog: CatalogConfig::from_env()?,
            rounding_scaler: env_parse("ROUNDING_SCALER", DEFAULT_SCALER)?,
            pool: PoolConfig {
                worker_count: parallelism.clamp(1, available_cpus()),
                max_queue_size,
            },
            job_timeout: Duration::from_secs(env_parse("INVOICE_JOB_TIMEOUT_SECS", 300)?),
            scheduler: SchedulerConfig {
                interval: env_parse_opt::<u64>("PERIODIC_INTERVAL_SECS")?
                    .map(Duration::from_secs),
                service_token: env_or("SERVICE_TOKEN", ""),
            },
            rerun_lookback_months: env_parse("RERUN_LOOKBACK_MONTHS", 1)?,
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
            "WORKER_COUNT",
            "WORKER_QUEUE_SIZE",
            "INVOICE_JOB_TIMEOUT_SECS",
            "PERIODIC_INTERVAL_SECS",
            "RERUN_LOOKBACK_MONTHS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_invoicing_config_defaults() {
        clear();
        env::set_var("STORE_BACKEND", "memory");

        let config = InvoicingConfig::from_env().unwrap();
        assert!(config.pool.worker_count >= 1);
        assert!(config.pool.worker_count <= available_cpus());
        assert_eq!(config.pool.max_queue_size, 1024);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert!(config.scheduler.interval.is_none());
        assert_eq!(config.rerun_lookback_months, 1);
        clear();
    }

    #[test]
    #[serial]
    fn test_worker_count_is_capped_by_cpus() {
        clear();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("WORKER_COUNT", "100000");
        env::set_var("PERIODIC_INTERVAL_SECS", "3600");

        let config = InvoicingConfig::from_env().unwrap();
        assert_eq!(config.pool.worker_count, available_cpus());
        assert_eq!(config.scheduler.interval, Some(Duration::from_secs(3600)));
        clear();
    }

    #[test]
    #[serial]
    fn test_empty_queue_is_rejected() {
        clear();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("WORKER_QUEUE_SIZE", "0");

        assert!(InvoicingConfig::from_env().is_err());
        clear();
    }
}
