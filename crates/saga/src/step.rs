//! The unit of work a saga is built from.

use async_trait::async_trait;

use crate::error::Result;
use crate::observer::StepRef;
use crate::retry::RetryPolicy;

/// Whether a step has side effects that must be undone on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Reads and checks only. Never compensated.
    Validation,
    /// Changes external state. Compensated unless it opts out.
    Transactional,
}

/// A forward action plus the action that undoes it.
///
/// `execute` may run several times for one context under the retry loop, so
/// it must be idempotent or free of side effects on retry. `compensate` is
/// only invoked after `execute` succeeded and a later step failed; its
/// errors are logged and never stop the remaining compensations.
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    /// Stable identifier, unique within a saga definition.
    fn step_id(&self) -> &str;

    /// Human readable name for logs and audit records.
    fn step_name(&self) -> &str {
        self.step_id()
    }

    fn step_ref(&self) -> StepRef<'_> {
        StepRef {
            id: self.step_id(),
            name: self.step_name(),
        }
    }

    fn kind(&self) -> StepKind;

    fn requires_compensation(&self) -> bool {
        self.kind() == StepKind::Transactional
    }

    /// Overrides the saga-wide retry policy for this step.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &mut C) -> Result<()>;

    async fn compensate(&self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }
}
