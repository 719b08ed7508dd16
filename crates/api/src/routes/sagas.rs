//! Saga audit records.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use saga::SagaAuditRecord;

use crate::AppState;
use crate::error::ApiError;

/// GET /sagas/{id} — the audit record of one saga execution.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaAuditRecord>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid saga id: {id}")))?;
    state
        .audit
        .record(SagaId::from_uuid(uuid))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("saga {id} not found")))
}

/// GET /sagas/attention — sagas whose compensation left work behind.
pub async fn needing_attention(State(state): State<Arc<AppState>>) -> Json<Vec<SagaAuditRecord>> {
    Json(state.audit.needing_reconciliation())
}
