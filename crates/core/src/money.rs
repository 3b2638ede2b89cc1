//! Money and percentage value objects.
//!
//! Amounts are stored as integer minor units (cents) and percentages as
//! basis points (1 bp = 0.01%). All arithmetic is exact; the only rounding
//! happens when a total is split between the owner and the store.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Basis points representing 100%.
pub const FULL_PERCENTAGE_BP: u32 = 10_000;

/// Allowed deviation of `owner + store` from 100%, in basis points (0.01%).
pub const SPLIT_TOLERANCE_BP: u32 = 1;

// Float noise allowed when reading a decimal percent as basis points.
const BASIS_POINT_EPSILON: f64 = 1e-6;

/// Non-negative monetary amount in cents.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    /// Unit price times quantity.
    pub fn checked_mul(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(u64::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    /// Owner share of this amount, rounded half up; the store gets the rest.
    pub fn split(self, owner: Percentage) -> RevenueSplit {
        let bp = u128::from(owner.basis_points().min(FULL_PERCENTAGE_BP));
        let numerator = u128::from(self.0) * bp;
        let half = u128::from(FULL_PERCENTAGE_BP / 2);
        // fits: result <= self.0
        let owner_cents = ((numerator + half) / u128::from(FULL_PERCENTAGE_BP)) as u64;
        let owner_cents = owner_cents.min(self.0);
        RevenueSplit {
            total: self,
            owner: Money(owner_cents),
            store: Money(self.0 - owner_cents),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl core::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Money(iter.map(|m| m.0).fold(0u64, u64::saturating_add))
    }
}

/// Percentage expressed in basis points (`7000` = 70%).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Percentage(u32);

impl ValueObject for Percentage {}

impl Percentage {
    pub const fn from_basis_points(bp: u32) -> Self {
        Self(bp)
    }

    pub const fn basis_points(self) -> u32 {
        self.0
    }

    /// Parse a decimal percentage in `0..=100` (e.g. `70.0`, `33.33`).
    ///
    /// At most two decimal places are accepted, so the basis points are
    /// exactly the value the caller sent.
    pub fn from_percent(percent: f64) -> DomainResult<Self> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(DomainError::validation(format!(
                "percentage must be between 0 and 100, got {percent}"
            )));
        }
        let scaled = percent * 100.0;
        let bp = scaled.round();
        if (scaled - bp).abs() > BASIS_POINT_EPSILON {
            return Err(DomainError::validation(format!(
                "percentage allows at most two decimal places, got {percent}"
            )));
        }
        Ok(Self(bp as u32))
    }

    pub fn as_percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Validate an owner/store pair: each within 0..=100% and summing to
    /// 100% within [`SPLIT_TOLERANCE_BP`].
    pub fn validate_split(owner: Percentage, store: Percentage) -> DomainResult<()> {
        if owner.0 > FULL_PERCENTAGE_BP || store.0 > FULL_PERCENTAGE_BP {
            return Err(DomainError::validation(
                "percentages must be between 0 and 100",
            ));
        }
        let sum = owner.0 + store.0;
        if sum.abs_diff(FULL_PERCENTAGE_BP) > SPLIT_TOLERANCE_BP {
            return Err(DomainError::validation(format!(
                "owner and store percentages must sum to 100 (got {})",
                f64::from(sum) / 100.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Result of dividing a sale (or a running total) between owner and store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub total: Money,
    pub owner: Money,
    pub store: Money,
}

impl ValueObject for RevenueSplit {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seventy_thirty_split_of_forty() {
        let split = Money::from_cents(4_000).split(Percentage::from_basis_points(7_000));
        assert_eq!(split.owner, Money::from_cents(2_800));
        assert_eq!(split.store, Money::from_cents(1_200));
    }

    #[test]
    fn owner_share_rounds_half_up() {
        // 0.05 * 50% = 0.025 -> owner 0.03, store 0.02
        let split = Money::from_cents(5).split(Percentage::from_basis_points(5_000));
        assert_eq!(split.owner, Money::from_cents(3));
        assert_eq!(split.store, Money::from_cents(2));
    }

    #[test]
    fn percent_parsing_and_split_tolerance() {
        let owner = Percentage::from_percent(33.33).unwrap();
        let store = Percentage::from_percent(66.66).unwrap();
        assert_eq!(owner.basis_points(), 3_333);
        assert!(Percentage::validate_split(owner, store).is_ok());

        let store = Percentage::from_percent(66.0).unwrap();
        assert!(matches!(
            Percentage::validate_split(owner, store),
            Err(DomainError::Validation(_))
        ));

        assert!(Percentage::from_percent(100.5).is_err());
        assert!(Percentage::from_percent(-1.0).is_err());
        assert!(Percentage::from_percent(f64::NAN).is_err());
        assert_eq!(Money::from_cents(1_205).to_string(), "12.05");
    }

    #[test]
    fn split_tolerance_is_checked_against_the_values_sent() {
        // within 0.01 of 100
        let owner = Percentage::from_percent(70.01).unwrap();
        let store = Percentage::from_percent(30.0).unwrap();
        assert!(Percentage::validate_split(owner, store).is_ok());

        // 100.014 would round into tolerance; sub-basis-point input is refused
        for percent in [70.014, 70.011, 70.0149] {
            assert!(matches!(
                Percentage::from_percent(percent),
                Err(DomainError::Validation(_))
            ));
        }

        let owner = Percentage::from_percent(70.02).unwrap();
        assert!(Percentage::validate_split(owner, store).is_err());
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        assert!(Money::from_cents(u64::MAX).checked_mul(2).is_err());
        assert!(Money::from_cents(u64::MAX).checked_add(Money::from_cents(1)).is_err());
        assert_eq!(
            Money::from_cents(250).checked_mul(4).unwrap(),
            Money::from_cents(1_000)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn split_parts_always_sum_to_total(cents in 0u64..=1_000_000_000_000, bp in 0u32..=10_000) {
            let split = Money::from_cents(cents).split(Percentage::from_basis_points(bp));
            prop_assert_eq!(split.owner.cents() + split.store.cents(), cents);
            prop_assert!(split.owner.cents() <= cents);
        }

        #[test]
        fn split_is_monotonic_in_owner_share(cents in 0u64..=10_000_000, bp in 0u32..10_000) {
            let lower = Money::from_cents(cents).split(Percentage::from_basis_points(bp));
            let higher = Money::from_cents(cents).split(Percentage::from_basis_points(bp + 1));
            prop_assert!(lower.owner <= higher.owner);
        }
    }
}
