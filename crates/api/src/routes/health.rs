//! Health check endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::SessionId;
use saga::SagaError;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health — liveness.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /health/ready — readiness: the ledger answers a lookup.
pub async fn ready(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    state
        .ledger
        .find_round_by_ext_id(SessionId::from_uuid(uuid::Uuid::nil()), "")
        .await
        .map_err(SagaError::from)?;
    Ok(Json(HealthResponse { status: "ready" }))
}
