//! # Money Module
//!
//! Provides the `Money` type for every monetary value in the ledger:
//! prices, costs, line totals, HPP, expenses.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  HISTORICAL FIGURES MUST NOT DRIFT                                      │
//! │                                                                         │
//! │  Floating point:  0.1 + 0.2 = 0.30000000000000004                       │
//! │  A month of sales summed in f64 does not reproduce the receipt totals. │
//! │                                                                         │
//! │  OUR SOLUTION: integer minor units (i64)                                │
//! │    Rp 1.500 is stored as 1500. Sums, HPP and margins are exact.        │
//! │    Only percentages for display are computed as f64.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kasir_core::money::Money;
//!
//! let price = Money::from_minor(1500);
//! let line = price.multiply_quantity(3);
//! assert_eq!(line.minor(), 4500);
//! assert_eq!(line.to_string(), "Rp 4.500");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// - **i64 (signed)**: negative values appear for losses and net figures
/// - **transparent**: serializes as a bare integer, stored as INTEGER
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[serde(transparent)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Zero.
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

    /// Multiplies a unit amount by a quantity in base units.
    ///
    /// ```rust
    /// use kasir_core::money::Money;
    ///
    /// let cost = Money::from_minor(1000);
    /// assert_eq!(cost.multiply_quantity(3).minor(), 3000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// `multiply_quantity`, `None` on overflow.
    ///
    /// ```rust
    /// use kasir_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(1000).checked_multiply_quantity(3), Some(Money::from_minor(3000)));
    /// assert_eq!(Money::from_minor(i64::MAX / 2).checked_multiply_quantity(3), None);
    /// ```
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(v) => Some(Money(v)),
            None => None,
        }
    }

    /// Addition, `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Money(v)),
            None => None,
        }
    }

    /// Subtraction, `None` on overflow.
    #[inline]
    pub const fn checked_sub(&self, other: Money) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(Money(v)),
            None => None,
        }
    }

    /// Addition clamped to the `i64` range.
    #[inline]
    pub const fn saturating_add(&self, other: Money) -> Self {
        Money(self.0.saturating_add(other.0))
    }

    /// `multiply_quantity`, clamped to the `i64` range. Used by reports over
    /// stored figures.
    #[inline]
    pub const fn saturating_multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// Calculates tax at the given rate, rounding half up.
    ///
    /// Uses i128 internally so large monthly totals cannot overflow.
    ///
    /// ```rust
    /// use kasir_core::money::Money;
    /// use kasir_core::types::TaxRate;
    ///
    /// let subtotal = Money::from_minor(4500);
    /// assert_eq!(subtotal.calculate_tax(TaxRate::from_bps(1100)).minor(), 495);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        let tax = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_minor(tax as i64)
    }

    /// Expresses `self` as a percentage of `base`, rounded to two decimals.
    ///
    /// Returns `0.0` when `base` is zero so reports over empty windows
    /// never divide by zero.
    ///
    /// ```rust
    /// use kasir_core::money::Money;
    ///
    /// let margin = Money::from_minor(1500);
    /// let revenue = Money::from_minor(4500);
    /// assert_eq!(margin.percentage_of(revenue), 33.33);
    /// assert_eq!(margin.percentage_of(Money::zero()), 0.0);
    /// ```
    pub fn percentage_of(&self, base: Money) -> f64 {
        if base.is_zero() {
            return 0.0;
        }
        // Basis points first, in integers, then one division for display.
        let bps = (self.0 as i128 * 1_000_000 / base.0 as i128) as f64;
        (bps / 100.0).round() / 100.0
    }

    /// Returns the larger of `self` and zero.
    #[inline]
    pub fn clamp_non_negative(&self) -> Money {
        Money(self.0.max(0))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Rupiah style: `Rp 12.500`, thousands separated by dots.
///
/// For logs and diagnostics. The UI layer owns localized formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}Rp {}", sign, grouped)
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
