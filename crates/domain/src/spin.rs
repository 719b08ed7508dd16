//! Spin records.

use chrono::{DateTime, Utc};
use common::{RoundId, SpinId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;
use crate::rules::WagerSplit;

/// Kind of monetary event recorded by a spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpinType {
    /// A bet.
    Place,
    /// A win paid against a bet.
    Settle,
    /// A refund or an audit trail of a compensated record.
    Rollback,
}

impl SpinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpinType::Place => "PLACE",
            SpinType::Settle => "SETTLE",
            SpinType::Rollback => "ROLLBACK",
        }
    }
}

impl std::fmt::Display for SpinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SpinType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLACE" => Ok(SpinType::Place),
            "SETTLE" => Ok(SpinType::Settle),
            "ROLLBACK" => Ok(SpinType::Rollback),
            other => Err(DomainError::UnknownSpinType(other.to_string())),
        }
    }
}

/// An immutable record of one monetary event within a round.
///
/// Invariants enforced by the constructors:
/// - `real_amount + bonus_amount == amount` for PLACE and SETTLE, except a
///   free-spin PLACE, which records a zero split.
/// - SETTLE and ROLLBACK reference a PLACE spin of the same round.
/// - ROLLBACK carries zero amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spin {
    pub id: SpinId,
    pub round_id: RoundId,
    pub spin_type: SpinType,
    pub amount: Money,
    pub real_amount: Money,
    pub bonus_amount: Money,
    /// Idempotency key supplied by the caller.
    pub transaction_id: String,
    pub reference_id: Option<SpinId>,
    pub free_spin_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Spin {
    /// Builds a PLACE spin.
    pub fn place(
        round_id: RoundId,
        transaction_id: impl Into<String>,
        amount: Money,
        split: WagerSplit,
        free_spin_id: Option<String>,
    ) -> Result<Self, DomainError> {
        ensure_non_negative(amount)?;
        let split = if free_spin_id.is_some() {
            WagerSplit::default()
        } else {
            split.checked(amount)?
        };

        Ok(Self {
            id: SpinId::new(),
            round_id,
            spin_type: SpinType::Place,
            amount,
            real_amount: split.real,
            bonus_amount: split.bonus,
            transaction_id: transaction_id.into(),
            reference_id: None,
            free_spin_id,
            created_at: Utc::now(),
        })
    }

    /// Builds a SETTLE spin paying `win` against `place`.
    pub fn settle(
        place: &Spin,
        transaction_id: impl Into<String>,
        win: Money,
        split: WagerSplit,
    ) -> Result<Self, DomainError> {
        ensure_non_negative(win)?;
        ensure_place(place)?;
        let split = split.checked(win)?;

        Ok(Self {
            id: SpinId::new(),
            round_id: place.round_id,
            spin_type: SpinType::Settle,
            amount: win,
            real_amount: split.real,
            bonus_amount: split.bonus,
            transaction_id: transaction_id.into(),
            reference_id: Some(place.id),
            free_spin_id: place.free_spin_id.clone(),
            created_at: Utc::now(),
        })
    }

    /// Builds a zero-amount ROLLBACK spin referencing `original`.
    ///
    /// `original` is normally a PLACE spin; compensation of a SETTLE write also
    /// produces a ROLLBACK row pointing at the SETTLE it voids.
    pub fn rollback(original: &Spin, transaction_id: impl Into<String>) -> Self {
        Self {
            id: SpinId::new(),
            round_id: original.round_id,
            spin_type: SpinType::Rollback,
            amount: Money::zero(),
            real_amount: Money::zero(),
            bonus_amount: Money::zero(),
            transaction_id: transaction_id.into(),
            reference_id: Some(original.id),
            free_spin_id: original.free_spin_id.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn is_free_spin(&self) -> bool {
        self.free_spin_id.is_some()
    }

    /// Returns the real/bonus split recorded on this spin.
    pub fn split(&self) -> WagerSplit {
        WagerSplit {
            real: self.real_amount,
            bonus: self.bonus_amount,
        }
    }

    /// Checks that `reference` may be referenced by a result recorded in this
    /// spin's round.
    pub fn ensure_references(&self, reference: &Spin) -> Result<(), DomainError> {
        if reference.round_id != self.round_id {
            return Err(DomainError::ReferenceOutsideRound {
                expected: self.round_id,
                actual: reference.round_id,
            });
        }
        Ok(())
    }
}

fn ensure_non_negative(amount: Money) -> Result<(), DomainError> {
    if amount.is_negative() {
        return Err(DomainError::NegativeAmount(amount));
    }
    Ok(())
}

fn ensure_place(spin: &Spin) -> Result<(), DomainError> {
    if spin.spin_type != SpinType::Place {
        return Err(DomainError::InvalidReference(spin.spin_type));
    }
    Ok(())
}
