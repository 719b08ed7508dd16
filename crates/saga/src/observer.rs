//! Hooks for step and saga transitions.

use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::state::SagaState;

/// Status reported for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Executing,
    Completed,
    Failed,
    Compensated,
    CompensationFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Executing => "EXECUTING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a step as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
}

/// Receives saga transitions for audit logging.
///
/// Observers are side effects only: they cannot influence the outcome and
/// must not block.
pub trait SagaObserver: Send + Sync {
    fn on_saga_started(&self, _saga_id: SagaId, _saga: &str) {}

    fn on_step(&self, _saga_id: SagaId, _saga: &str, _step: StepRef<'_>, _status: StepStatus) {}

    fn on_saga_finished(&self, _saga_id: SagaId, _saga: &str, _state: SagaState) {}
}

/// Writes every transition to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SagaObserver for TracingObserver {
    fn on_saga_started(&self, saga_id: SagaId, saga: &str) {
        tracing::debug!(%saga_id, saga, "saga started");
    }

    fn on_step(&self, saga_id: SagaId, saga: &str, step: StepRef<'_>, status: StepStatus) {
        match status {
            StepStatus::Failed | StepStatus::CompensationFailed => tracing::warn!(
                %saga_id,
                saga,
                step = step.id,
                step_name = step.name,
                %status,
                "saga step transition"
            ),
            _ => tracing::debug!(
                %saga_id,
                saga,
                step = step.id,
                step_name = step.name,
                %status,
                "saga step transition"
            ),
        }
    }

    fn on_saga_finished(&self, saga_id: SagaId, saga: &str, state: SagaState) {
        tracing::info!(%saga_id, saga, %state, "saga finished");
    }
}
