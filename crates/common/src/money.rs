use serde::{Deserialize, Serialize};

/// Monetary amount in integer cents.
///
/// Used for batch unit costs, stock valuation and the collect-on-delivery
/// amount of an order. A unit cost of zero means the cost has not been
/// entered yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Whole currency units.
    pub fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Cents remaining after whole units.
    pub fn cents_part(&self) -> i64 {
        self.0.abs() % 100
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a unit count, saturating on overflow.
    pub fn times(&self, quantity: i64) -> Money {
        Money(self.0.saturating_mul(quantity))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-{}.{:02}", self.units().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.units(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_parts() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.units(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn money_times_and_sum() {
        let unit = Money::from_cents(250);
        assert_eq!(unit.times(4).cents(), 1000);

        let total: Money = [Money::from_cents(100), Money::from_cents(50)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 150);
    }

    #[test]
    fn money_times_saturates() {
        assert_eq!(Money::from_cents(i64::MAX).times(2).cents(), i64::MAX);
    }

    #[test]
    fn money_sum_saturates() {
        let total: Money = [Money::from_cents(i64::MAX), Money::from_cents(i64::MAX)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), i64::MAX);
    }

    #[test]
    fn zero_cost_is_zero() {
        assert!(Money::default().is_zero());
        assert!(Money::from_cents(-1).is_negative());
    }
}
