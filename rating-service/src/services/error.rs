use service_core::error::AppError;

use crate::services::catalog_source::CatalogError;
use crate::services::pipeline::PipelineError;
use crate::services::rating::RatingError;

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            CatalogError::Unavailable { .. } | CatalogError::UnexpectedRecord { .. } => {
                AppError::BadGateway(err.to_string())
            }
            CatalogError::Snapshot(_) => AppError::ConfigError(anyhow::anyhow!(err.to_string())),
        }
    }
}

impl From<RatingError> for AppError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::CatalogLookup(e) => e.into(),
            RatingError::MissingFlavor { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            RatingError::PlanUnavailable { .. } => AppError::BadGateway(err.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Rating(e) => e.into(),
            PipelineError::Cdr(e) => e.into(),
        }
    }
}
