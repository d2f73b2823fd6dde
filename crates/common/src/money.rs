//! Money amounts in the store currency.

use serde::{Deserialize, Serialize};

/// An amount in the store currency's major unit (VND has no minor unit in practice).
///
/// Amounts are whole integers so totals stay exact; percentage discounts round down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from whole currency units.
    pub const fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in whole currency units.
    pub const fn amount(&self) -> i64 {
        self.0
    }

    /// Returns the amount expressed in hundredths, as some providers expect.
    pub const fn minor_units(&self) -> i64 {
        self.0 * 100
    }

    /// Builds an amount from hundredths, truncating any fractional unit.
    pub const fn from_minor_units(minor: i64) -> Self {
        Self(minor / 100)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a line quantity.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0 * i64::from(quantity))
    }

    /// Returns `percent`% of this amount, rounded down to a whole unit.
    pub fn percent(&self, percent: i64) -> Money {
        let scaled = i128::from(self.0) * i128::from(percent) / 100;
        Money(scaled as i64)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} VND", self.0)
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Self(amount)
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

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}
