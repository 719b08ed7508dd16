//! Domain error types.

use common::RoundId;
use thiserror::Error;

use crate::money::Money;
use crate::spin::SpinType;

/// Invariant violations raised while building domain records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Amounts must not be negative.
    #[error("Invalid amount: {0}")]
    NegativeAmount(Money),

    /// Real and bonus parts must add up to the spin amount.
    #[error("Split mismatch: real {real} + bonus {bonus} != amount {amount}")]
    SplitMismatch {
        amount: Money,
        real: Money,
        bonus: Money,
    },

    /// A SETTLE or ROLLBACK spin must reference a PLACE spin.
    #[error("Spin of type {0} cannot be referenced by a result")]
    InvalidReference(SpinType),

    /// The referenced spin belongs to a different round.
    #[error("Referenced spin belongs to round {actual}, expected {expected}")]
    ReferenceOutsideRound { expected: RoundId, actual: RoundId },

    /// Unknown spin type label.
    #[error("Unknown spin type: {0}")]
    UnknownSpinType(String),
}
