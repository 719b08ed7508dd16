//! Monetary value objects.

use serde::{Deserialize, Serialize};

/// Money amount in minor units (e.g. cents) to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from minor units.
    pub const fn from_minor(units: i64) -> Self {
        Self(units)
    }

    /// Creates an amount from whole major units.
    pub const fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Returns the whole major-unit portion.
    pub fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor-unit remainder after the major units.
    pub fn minor_part(&self) -> i64 {
        self.0.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-{}.{:02}", self.major().abs(), self.minor_part())
        } else {
            write!(f, "{}.{:02}", self.major(), self.minor_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// ISO-style currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A player's balance as reported by the wallet.
///
/// Owned by the external wallet; this crate only reads it or predicts the
/// balance after a debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub real: Money,
    pub bonus: Money,
    pub currency: Currency,
}

impl Balance {
    pub fn new(real: Money, bonus: Money, currency: impl Into<Currency>) -> Self {
        Self {
            real,
            bonus,
            currency: currency.into(),
        }
    }

    /// Real plus bonus funds.
    pub fn total(&self) -> Money {
        self.real + self.bonus
    }

    /// Balance after withdrawing the given split.
    pub fn debited(&self, real: Money, bonus: Money) -> Balance {
        Balance {
            real: self.real - real,
            bonus: self.bonus - bonus,
            currency: self.currency.clone(),
        }
    }

    /// Balance after depositing the given split.
    pub fn credited(&self, real: Money, bonus: Money) -> Balance {
        Balance {
            real: self.real + real,
            bonus: self.bonus + bonus,
            currency: self.currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_units() {
        let money = Money::from_minor(1234);
        assert_eq!(money.minor(), 1234);
        assert_eq!(money.major(), 12);
        assert_eq!(money.minor_part(), 34);
        assert_eq!(Money::from_major(5).minor(), 500);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_minor(1234).to_string(), "12.34");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_arithmetic() {
        let mut a = Money::from_minor(1000);
        let b = Money::from_minor(300);

        assert_eq!((a + b).minor(), 1300);
        assert_eq!((a - b).minor(), 700);

        a -= b;
        assert_eq!(a.minor(), 700);
        a += b;
        assert_eq!(a.minor(), 1000);
    }

    #[test]
    fn test_money_sign() {
        assert!(Money::from_minor(1).is_positive());
        assert!(Money::zero().is_zero());
        assert!(Money::from_minor(-1).is_negative());
    }

    #[test]
    fn test_balance_total_and_updates() {
        let balance = Balance::new(Money::from_minor(500), Money::from_minor(200), "EUR");
        assert_eq!(balance.total(), Money::from_minor(700));

        let debited = balance.debited(Money::from_minor(500), Money::from_minor(50));
        assert_eq!(debited.real, Money::zero());
        assert_eq!(debited.bonus, Money::from_minor(150));
        assert_eq!(debited.currency.as_str(), "EUR");

        let credited = debited.credited(Money::from_minor(10), Money::zero());
        assert_eq!(credited.total(), Money::from_minor(160));
    }
}
