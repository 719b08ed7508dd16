//! Saga error types.

use common::SessionId;
use domain::{DomainError, Money};
use ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur while running a saga or one of its steps.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No round exists for the session and external round id.
    #[error("Round not found: session {session_id}, round {ext_round_id}")]
    RoundNotFound {
        session_id: SessionId,
        ext_round_id: String,
    },

    /// The round has no open PLACE spin to act on.
    #[error("Round finished: {0}")]
    RoundFinished(String),

    /// The game is unknown to the catalog or not playable.
    #[error("Game unavailable: {0}")]
    GameUnavailable(String),

    /// A value a step depends on is missing from the context.
    #[error("Illegal saga state: {0}")]
    IllegalState(String),

    /// The wager exceeds the player's total balance.
    #[error("Insufficient balance: requested {amount}, available {available}")]
    InsufficientBalance { amount: Money, available: Money },

    /// The wager exceeds the player's current bet limit.
    #[error("Bet limit exceeded: requested {amount}, limit {limit}")]
    BetLimitExceeded { amount: Money, limit: Money },

    /// A collaborator did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A collaborator could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The wallet rejected the request.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// The wallet refused a transaction id it has already processed.
    #[error("Duplicate wallet transaction: {0}")]
    DuplicateTransaction(String),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Context value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A step panicked instead of returning a result.
    #[error("Saga step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    /// The detached compensation task did not run to completion.
    #[error("Compensation task failed: {0}")]
    CompensationTask(String),
}

/// Coarse classification of a [`SagaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input or lookup failure. Never retried.
    Validation,
    /// Business rule rejection. Never retried.
    BusinessRule,
    /// Infrastructure hiccup. Retried per the step's policy.
    Transient,
    /// Non-transient rejection by a collaborator.
    Collaborator,
    /// Fault in the saga machinery itself.
    Orchestration,
}

impl SagaError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::RoundNotFound { .. }
            | SagaError::RoundFinished(_)
            | SagaError::GameUnavailable(_)
            | SagaError::IllegalState(_)
            | SagaError::Domain(_) => ErrorKind::Validation,
            SagaError::InsufficientBalance { .. } | SagaError::BetLimitExceeded { .. } => {
                ErrorKind::BusinessRule
            }
            SagaError::Timeout(_) | SagaError::Unavailable(_) => ErrorKind::Transient,
            SagaError::Ledger(e) if e.is_transient() => ErrorKind::Transient,
            SagaError::Ledger(_) | SagaError::Wallet(_) | SagaError::DuplicateTransaction(_) => {
                ErrorKind::Collaborator
            }
            SagaError::Serialization(_)
            | SagaError::StepPanicked { .. }
            | SagaError::CompensationTask(_) => ErrorKind::Orchestration,
        }
    }

    /// Returns true for failures that always qualify for a retry.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
