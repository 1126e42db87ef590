//! Application startup and lifecycle management.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{CatalogBackend, CatalogConfig, RatingConfig, StoreBackend, StoreConfig};
use crate::handlers;
use crate::rounding::Rounder;
use crate::services::{
    init_metrics, CatalogCache, CatalogSource, CdrRepository, Database, HttpCatalogSource,
    LedgerForwarder, MemoryCdrStore, RatingEngine, RatingPipeline, StaticCatalog,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: RatingConfig,
    pub catalog: Arc<CatalogCache>,
    pub pipeline: RatingPipeline,
}

/// Catalog backend selected by configuration.
pub fn catalog_source(config: &CatalogConfig) -> Result<Arc<dyn CatalogSource>, AppError> {
    match config.backend {
        CatalogBackend::Http => Ok(Arc::new(HttpCatalogSource::new(
            config.registries.clone(),
            config.request_timeout,
        )?)),
        CatalogBackend::Static => {
            let path = config.snapshot_path.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("CATALOG_SNAPSHOT_PATH is not set"))
            })?;
            Ok(Arc::new(StaticCatalog::from_json_file(path)?))
        }
    }
}

/// Evict expired catalog entries once per TTL.
pub fn spawn_catalog_purge(cache: Arc<CatalogCache>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged = purged, "Expired catalog entries purged");
            }
        }
    });
}

/// CDR store selected by configuration. Postgres stores are migrated first
/// when `run_migrations` is set.
pub async fn cdr_store(
    config: &StoreConfig,
    run_migrations: bool,
) -> Result<Arc<dyn CdrRepository>, AppError> {
    match (config.backend, &config.database) {
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory CDR store, records are lost on restart");
            Ok(Arc::new(MemoryCdrStore::new()))
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
            if run_migrations {
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
            }
            Ok(Arc::new(db))
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
    pub async fn build(config: RatingConfig) -> Result<Self, AppError> {
        let source = catalog_source(&config.catalog)?;
        let cdrs = cdr_store(&config.store, true).await?;
        Self::build_with(config, source, cdrs).await
    }

    /// Build the application around an explicit catalog source and CDR store.
    pub async fn build_with(
        config: RatingConfig,
        source: Arc<dyn CatalogSource>,
        cdrs: Arc<dyn CdrRepository>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let catalog = Arc::new(CatalogCache::new(source, config.catalog.ttl));
        spawn_catalog_purge(catalog.clone(), config.catalog.ttl);

        let engine = Arc::new(RatingEngine::new(
            catalog.clone(),
            Rounder::new(config.rounding_scaler),
        ));
        let (ledger, _) = LedgerForwarder::spawn(config.ledger.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Ledger client: {}", e)))?;
        let pipeline = RatingPipeline::new(engine, cdrs, ledger);

        let state = AppState {
            config: config.clone(),
            catalog,
            pipeline,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Rating service listener bound");

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
            .route("/api/v1/rate", post(handlers::rate_usage))
            .route("/api/v1/cdr/:organization_id", get(handlers::list_cdrs))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state)
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Self::router(self.state);

        tracing::info!(
            service = "rating-service",
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
