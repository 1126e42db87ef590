use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::middleware::AuthToken;
use validator::Validate;

use crate::dtos::{CdrListParams, RateRequest, RateResponse};
use crate::services::RatingContext;
use crate::startup::AppState;

/// Rate a usage report and record the result.
pub async fn rate_usage(
    State(state): State<AppState>,
    token: AuthToken,
    Json(request): Json<RateRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let ctx = RatingContext::new(request.plan_id, token.0);
    let (costed, saved) = state
        .pipeline
        .process(&request.report, &ctx, request.regenerate)
        .await?;

    Ok(Json(RateResponse::new(costed, &saved)))
}

/// Stored CDRs of one organization.
pub async fn list_cdrs(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    Query(params): Query<CdrListParams>,
) -> Result<impl IntoResponse, AppError> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "from ({}) is after to ({})",
                from,
                to
            )));
        }
    }

    let records = state
        .pipeline
        .cdrs()
        .list(&organization_id, params.from, params.to)
        .await?;

    Ok(Json(records))
}
