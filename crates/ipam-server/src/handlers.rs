//! HTTP request handlers

use crate::error::{ApiError, Result};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use ipam_core::{AllocatedBlock, Child};
use std::sync::Arc;

fn decode(payload: std::result::Result<Json<Child>, JsonRejection>) -> Result<Child> {
    payload
        .map(|Json(child)| child)
        .map_err(|e| ApiError::MalformedBody(e.body_text()))
}

/// Allocate (or return the existing) block for a child
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Child>, JsonRejection>,
) -> Result<Json<AllocatedBlock>> {
    let child = decode(payload)?;
    let block = state.service.allocate(&child).await?;
    Ok(Json(block))
}

/// Release a child's block
pub async fn release(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Child>, JsonRejection>,
) -> Result<StatusCode> {
    let child = decode(payload)?;
    state.service.release(&child).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
