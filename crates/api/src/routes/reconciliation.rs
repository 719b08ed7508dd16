//! Inspection and manual trigger of optimistic-debit reconciliation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::{ReconciliationReport, ReconciliationSnapshot};

use crate::AppState;

/// GET /reconciliation — pending and escalated entries.
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Json<ReconciliationSnapshot> {
    Json(state.reconciler.queue().snapshot().await)
}

/// POST /reconciliation/run — runs one reconciliation pass now.
pub async fn run(State(state): State<Arc<AppState>>) -> Json<ReconciliationReport> {
    let report = state.reconciler.run_once().await;
    tracing::info!(?report, "manual reconciliation pass");
    Json(report)
}
