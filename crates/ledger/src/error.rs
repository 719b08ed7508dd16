use common::{RoundId, SpinId};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when reading or writing rounds and spins.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No round exists with the given id.
    #[error("Round not found: {0}")]
    RoundNotFound(RoundId),

    /// The round already has a PLACE spin recorded under another transaction.
    #[error("Round {round_id} already has a PLACE spin (transaction {existing_transaction})")]
    DuplicatePlaceSpin {
        round_id: RoundId,
        existing_transaction: String,
    },

    /// A SETTLE or ROLLBACK spin points at a spin outside its round.
    #[error("Referenced spin {reference_id} not found in round {round_id}")]
    ReferenceNotFound {
        round_id: RoundId,
        reference_id: SpinId,
    },

    /// The storage backend is temporarily unreachable.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A stored row violates a domain invariant.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true for connectivity failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
