//! Business rules for splitting wagers and wins between real and bonus funds.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::{Balance, Money};
use crate::spin::Spin;

/// Real/bonus breakdown of an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WagerSplit {
    pub real: Money,
    pub bonus: Money,
}

impl WagerSplit {
    pub fn new(real: Money, bonus: Money) -> Self {
        Self { real, bonus }
    }

    /// Everything on the real side.
    pub fn all_real(amount: Money) -> Self {
        Self::new(amount, Money::zero())
    }

    /// Everything on the bonus side.
    pub fn all_bonus(amount: Money) -> Self {
        Self::new(Money::zero(), amount)
    }

    pub fn total(&self) -> Money {
        self.real + self.bonus
    }

    pub fn is_zero(&self) -> bool {
        self.real.is_zero() && self.bonus.is_zero()
    }

    /// Returns the split if both parts are non-negative and add up to `amount`.
    pub fn checked(self, amount: Money) -> Result<Self, DomainError> {
        if self.real.is_negative() || self.bonus.is_negative() || self.total() != amount {
            return Err(DomainError::SplitMismatch {
                amount,
                real: self.real,
                bonus: self.bonus,
            });
        }
        Ok(self)
    }
}

/// Splits a wager: real funds are consumed first, the remainder comes from bonus.
///
/// The caller must already have checked `amount <= balance.total()`.
pub fn split_wager(amount: Money, balance: &Balance) -> WagerSplit {
    let available_real = if balance.real.is_negative() {
        Money::zero()
    } else {
        balance.real
    };
    let real = amount.min(available_real);
    WagerSplit::new(real, amount - real)
}

/// Splits a win for the PLACE spin it settles.
///
/// Free-spin wins always go to real funds. Otherwise, if the bet used any
/// bonus funds the whole win is bonus, else the whole win is real.
pub fn split_win(win: Money, place: &Spin) -> WagerSplit {
    if place.is_free_spin() {
        return WagerSplit::all_real(win);
    }
    if place.bonus_amount.is_positive() {
        WagerSplit::all_bonus(win)
    } else {
        WagerSplit::all_real(win)
    }
}
