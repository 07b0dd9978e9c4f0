//! # Money Module
//!
//! The `Money` type for every amount the ledger touches: unit costs,
//! sale totals, journal lines, valuations.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Journal lines must balance EXACTLY.                                    │
//! │                                                                         │
//! │  Floating point:  230 / 1.15 = 199.99999999999997  → debit ≠ credit     │
//! │                                                                         │
//! │  Integer cents:   23000 * 10000 / 11500 = 20000    → exact              │
//! │                                                                         │
//! │  Any remainder from a division is rounded ONCE, and the complementary   │
//! │  amount is derived by subtraction so totals still add up.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

/// A monetary value in cents.
///
/// Signed so that reversals and net figures (e.g. a negative net profit)
/// are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Tax on a tax-exclusive amount, rounded half up.
    ///
    /// ## Example
    /// ```rust
    /// use stockledger_core::money::Money;
    /// use stockledger_core::types::TaxRate;
    ///
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        Money(div_round_half_up(self.0 as i128 * rate.bps() as i128, 10_000))
    }

    /// Splits a tax-inclusive amount into `(base, tax)`.
    ///
    /// `base = amount / (1 + R)` rounded to the cent, and `tax` is the
    /// remainder, so `base + tax == amount` always holds.
    ///
    /// ## Example
    /// ```rust
    /// use stockledger_core::money::Money;
    /// use stockledger_core::types::TaxRate;
    ///
    /// let (base, tax) = Money::from_cents(1000).split_tax_inclusive(TaxRate::from_bps(1500));
    /// assert_eq!(base.cents(), 870); // 869.56 rounds up
    /// assert_eq!(tax.cents(), 130);
    /// ```
    pub fn split_tax_inclusive(&self, rate: TaxRate) -> (Money, Money) {
        let base = div_round_half_up(
            self.0 as i128 * 10_000,
            10_000 + rate.bps() as i128,
        );
        (Money(base), Money(self.0 - base))
    }

    /// Multiplies a unit amount by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// `None` when the product leaves the `i64` range.
    #[inline]
    pub fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        self.0.checked_mul(qty).map(Money)
    }

    /// `None` when the sum leaves the `i64` range.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Self> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Average amount per unit, rounded half up to the cent.
    ///
    /// Used to record the captured unit cost of a multi-layer consumption.
    /// Returns zero for a non-positive quantity.
    ///
    /// ## Example
    /// ```rust
    /// use stockledger_core::money::Money;
    ///
    /// // 20 × $10.00 + 5 × $12.00 = $260.00 over 25 units
    /// assert_eq!(Money::from_cents(26000).per_unit(25).cents(), 1040);
    /// ```
    pub fn per_unit(&self, qty: i64) -> Money {
        if qty <= 0 {
            return Money::zero();
        }
        Money(div_round_half_up(self.0 as i128, qty as i128))
    }
}

/// Integer division rounding half away from zero. `denominator` must be > 0.
fn div_round_half_up(numerator: i128, denominator: i128) -> i64 {
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        -((-numerator + half) / denominator)
    };
    rounded as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// For logs and debugging only. Display formatting belongs to the UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}${}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_split_tax_inclusive_exact() {
        let (base, tax) = Money::from_cents(23000).split_tax_inclusive(TaxRate::from_bps(1500));
        assert_eq!(base.cents(), 20000);
        assert_eq!(tax.cents(), 3000);
    }

    #[test]
    fn test_split_tax_inclusive_always_sums_back() {
        let rate = TaxRate::from_bps(1500);
        for cents in [1, 7, 99, 101, 1234, 99999, 1_000_003] {
            let amount = Money::from_cents(cents);
            let (base, tax) = amount.split_tax_inclusive(rate);
            assert_eq!(base + tax, amount, "split of {} cents", cents);
            assert!(!tax.is_negative());
        }
    }

    #[test]
    fn test_split_with_zero_rate() {
        let (base, tax) = Money::from_cents(4999).split_tax_inclusive(TaxRate::zero());
        assert_eq!(base.cents(), 4999);
        assert!(tax.is_zero());
    }

    #[test]
    fn test_checked_arithmetic() {
        let cost = Money::from_cents(1000);
        assert_eq!(cost.checked_multiply_quantity(25).unwrap().cents(), 25000);
        assert!(cost.checked_multiply_quantity(i64::MAX).is_none());
        assert_eq!(cost.checked_add(cost).unwrap().cents(), 2000);
        assert!(Money::from_cents(i64::MAX).checked_add(cost).is_none());
    }

    #[test]
    fn test_per_unit_rounding() {
        assert_eq!(Money::from_cents(1000).per_unit(3).cents(), 333);
        assert_eq!(Money::from_cents(1001).per_unit(2).cents(), 501);
        assert_eq!(Money::from_cents(1000).per_unit(0).cents(), 0);
    }

    #[test]
    fn test_tax_calculation_with_rounding() {
        let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
        assert_eq!(tax.cents(), 83);
    }

    #[test]
    fn test_sum_and_neg() {
        let total: Money = [100, 250, -50].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total.cents(), 300);
        assert_eq!((-total).cents(), -300);
    }
}
