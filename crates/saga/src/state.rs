//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       └──► Compensating ──┬──► Compensated
///                                           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga has not started yet.
    #[default]
    Pending,

    /// Saga steps are being executed.
    Running,

    /// A step failed and compensating actions are in progress.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Compensation ran after a step failure; the failure is returned to the
    /// caller (terminal state).
    Compensated,

    /// The orchestration itself faulted (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::Pending)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if the state machine allows moving to `next`.
    ///
    /// Any non-terminal state may fall to `Failed` when the orchestration
    /// itself faults.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        match next {
            SagaState::Running => self.can_run(),
            SagaState::Compensating => self.can_compensate(),
            SagaState::Completed => *self == SagaState::Running,
            SagaState::Compensated => *self == SagaState::Compensating,
            SagaState::Failed => !self.is_terminal(),
            SagaState::Pending => false,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "Pending",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Compensated => "Compensated",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(SagaState::default(), SagaState::Pending);
    }

    #[test]
    fn test_can_run() {
        assert!(SagaState::Pending.can_run());
        assert!(!SagaState::Running.can_run());
        assert!(!SagaState::Compensated.can_run());
    }

    #[test]
    fn test_can_compensate() {
        assert!(!SagaState::Pending.can_compensate());
        assert!(SagaState::Running.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(!SagaState::Completed.can_compensate());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::Pending.is_terminal());
        assert!(!SagaState::Running.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Compensated.is_terminal());
        assert!(SagaState::Failed.is_terminal());
    }

    #[test]
    fn test_transitions_follow_the_lifecycle() {
        use SagaState::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Compensating));
        assert!(Compensating.can_transition_to(Compensated));
        assert!(Compensating.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Compensated));
        assert!(!Compensating.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Compensating));
        assert!(!Compensated.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn test_serialization() {
        let state = SagaState::Compensated;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"Compensated\"");
        let deserialized: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
