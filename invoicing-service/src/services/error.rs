use rating_service::services::{CatalogError, CdrError, PipelineError, RatingError};
use service_core::error::AppError;

use crate::models::Period;
use crate::services::store::StoreError;
use crate::workers::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum InvoicingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Rating(#[from] RatingError),

    #[error(transparent)]
    Cdr(#[from] CdrError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("invalid billing period {0}")]
    InvalidPeriod(Period),

    #[error("invoice {0} not found")]
    InvoiceNotFound(uuid::Uuid),

    #[error("invoice job timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<PipelineError> for InvoicingError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Rating(e) => InvoicingError::Rating(e),
            PipelineError::Cdr(e) => InvoicingError::Cdr(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            StoreError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            StoreError::Storage(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
        }
    }
}

impl From<InvoicingError> for AppError {
    fn from(err: InvoicingError) -> Self {
        match err {
            InvoicingError::Store(e) => e.into(),
            InvoicingError::Catalog(e) => e.into(),
            InvoicingError::Rating(e) => e.into(),
            InvoicingError::Cdr(e) => e.into(),
            InvoicingError::Pool(_) => AppError::ServiceUnavailable,
            InvoicingError::InvalidPeriod(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            InvoicingError::InvoiceNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            InvoicingError::Timeout(_) => AppError::GatewayTimeout(err.to_string()),
        }
    }
}
