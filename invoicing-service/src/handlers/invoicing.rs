use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use service_core::middleware::AuthToken;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{GenerateInvoiceRequest, PeriodicRequest, RerunRequest};
use crate::services::{GenerationStatus, RerunStatus};
use crate::startup::AppState;

fn accepted_status(status: GenerationStatus) -> StatusCode {
    match status {
        GenerationStatus::Queued => StatusCode::ACCEPTED,
        GenerationStatus::AlreadyInProgress => StatusCode::OK,
    }
}

/// Start invoicing one organization. Poll the returned bill run for progress.
pub async fn generate_invoices(
    State(state): State<AppState>,
    token: AuthToken,
    Json(request): Json<GenerateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let outcome = state
        .generator
        .generate_for(
            request.organization_type,
            &request.organization_id,
            token.as_str(),
            request.period(),
        )
        .await?;

    Ok((accepted_status(outcome.status), Json(outcome)))
}

/// Invoice every billable organization for the windows closed at the
/// reference date.
pub async fn generate_periodic(
    State(state): State<AppState>,
    token: AuthToken,
    Json(request): Json<PeriodicRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let reference = request
        .reference_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let outcome = state
        .generator
        .generate_periodic(reference, token.as_str())
        .await?;

    Ok((accepted_status(outcome.status), Json(outcome)))
}

pub async fn rerun_bill_run(
    State(state): State<AppState>,
    token: AuthToken,
    Json(request): Json<RerunRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let months = request
        .months
        .unwrap_or(state.config.rerun_lookback_months);
    let outcome = state
        .generator
        .rerun(request.bill_run_id, months, token.as_str())
        .await;

    let status = match outcome.status {
        RerunStatus::Ok => StatusCode::OK,
        RerunStatus::Missing => StatusCode::NOT_FOUND,
        RerunStatus::Fail => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)))
}

pub async fn get_bill_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let run = state
        .store
        .get_bill_run(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bill run {} not found", id)))?;
    Ok(Json(run))
}

pub async fn list_bill_run_invoices(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if state.store.get_bill_run(id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!("Bill run {} not found", id)));
    }
    let invoices = state.store.list_invoices_for_bill_run(id).await?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .store
        .get_invoice(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", id)))?;
    Ok(Json(invoice))
}
