//! Services module for rating-service.

pub mod catalog_cache;
pub mod catalog_http;
pub mod catalog_source;
pub mod cdr_store;
pub mod database;
mod error;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod rating;

pub use catalog_cache::CatalogCache;
pub use catalog_http::{HttpCatalogSource, RegistryUrls};
pub use catalog_source::{
    CatalogError, CatalogKind, CatalogLookup, CatalogQuery, CatalogRecord, CatalogSource,
    StaticCatalog,
};
pub use cdr_store::{CdrError, CdrRepository, MemoryCdrStore};
pub use database::Database;
pub use ledger::{LedgerConfig, LedgerForwarder, LedgerMessage};
pub use metrics::{get_metrics, init_metrics};
pub use pipeline::{PipelineError, RatingPipeline};
pub use rating::{effective_bundle_prices, RatingContext, RatingEngine, RatingError};
