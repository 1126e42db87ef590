//! Application startup and lifecycle management.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use rating_service::config::{StoreBackend, StoreConfig};
use rating_service::rounding::Rounder;
use rating_service::services::{
    CatalogCache, CatalogSource, CdrRepository, LedgerForwarder, MemoryCdrStore, RatingEngine,
    RatingPipeline,
};
use rating_service::startup::{catalog_source, spawn_catalog_purge};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::InvoicingConfig;
use crate::handlers;
use crate::services::{
    init_metrics, spawn_scheduler, BillingStore, Database, InvoiceGenerator, MemoryStore,
};
use crate::workers::{BillRunAggregator, InvoiceProcessor, WorkerPool};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: InvoicingConfig,
    pub store: Arc<dyn BillingStore>,
    pub generator: Arc<InvoiceGenerator>,
}

/// Billing and CDR stores selected by configuration. With Postgres both live
/// in the same database and share one pool.
pub async fn stores(
    config: &StoreConfig,
) -> Result<(Arc<dyn BillingStore>, Arc<dyn CdrRepository>), AppError> {
    match (config.backend, &config.database) {
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory billing store, bill runs are lost on restart");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryCdrStore::new())))
        }
        (StoreBackend::Postgres, Some(database)) => {
            let db = Database::new(
                &database.url,
                database.max_connections,
                database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                e
            })?;
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;

            let cdrs = rating_service::services::Database::from_pool(db.pool().clone());
            Ok((Arc::new(db), Arc::new(cdrs)))
        }
        (StoreBackend::Postgres, None) => Err(AppError::ConfigError(anyhow::anyhow!(
            "Postgres store selected without database settings"
        ))),
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        let source = catalog_source(&config.catalog)?;
        let (store, cdrs) = stores(&config.store).await?;
        Self::build_with(config, source, store, cdrs).await
    }

    /// Build the application around an explicit catalog source and stores.
    pub async fn build_with(
        config: InvoicingConfig,
        source: Arc<dyn CatalogSource>,
        store: Arc<dyn BillingStore>,
        cdrs: Arc<dyn CdrRepository>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let catalog = Arc::new(CatalogCache::new(source, config.catalog.ttl));
        spawn_catalog_purge(catalog.clone(), config.catalog.ttl);

        let rounder = Rounder::new(config.rounding_scaler);
        let engine = Arc::new(RatingEngine::new(catalog.clone(), rounder));
        let (ledger, _) = LedgerForwarder::spawn(config.ledger.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Ledger client: {}", e)))?;
        let pipeline = RatingPipeline::new(engine, cdrs, ledger);

        let processor = Arc::new(InvoiceProcessor::new(
            store.clone(),
            pipeline,
            config.job_timeout,
        ));
        let aggregator = Arc::new(BillRunAggregator::new(store.clone(), rounder));
        let pool = WorkerPool::new(config.pool.clone(), processor, aggregator);
        let generator = Arc::new(InvoiceGenerator::new(
            store.clone(),
            catalog,
            pool,
            config.job_timeout,
        ));

        spawn_scheduler(generator.clone(), config.scheduler.clone());

        let state = AppState {
            config: config.clone(),
            store,
            generator,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port = port,
            worker_count = config.pool.worker_count,
            "Invoicing service listener bound"
        );

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route("/api/v1/invoices/generate", post(handlers::generate_invoices))
            .route(
                "/api/v1/invoices/generate/periodic",
                post(handlers::generate_periodic),
            )
            .route("/api/v1/invoices/:id", get(handlers::get_invoice))
            .route("/api/v1/billruns/rerun", post(handlers::rerun_bill_run))
            .route("/api/v1/billruns/:id", get(handlers::get_bill_run))
            .route(
                "/api/v1/billruns/:id/invoices",
                get(handlers::list_bill_run_invoices),
            )
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state)
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Self::router(self.state);

        tracing::info!(
            service = "invoicing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
