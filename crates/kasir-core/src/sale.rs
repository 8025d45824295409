//! # Sale Math
//!
//! Pure calculations behind the Sale Transaction Manager: line totals,
//! header totals reconciliation, tender settlement and invoice numbers.
//!
//! ## Totals Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line.total = quantity × unit_price − line.discount      (≥ 0)          │
//! │                         │                                               │
//! │                         ▼  Σ                                            │
//! │  subtotal  ≈ Σ line.total        (within configured tolerance)         │
//! │  total     = subtotal − discount + tax                  (> 0, exact)    │
//! │                         │                                               │
//! │                         ▼  finalize                                     │
//! │  paid ≥ total,   change = paid − total                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Money is integer minor units, so `total = subtotal − discount + tax` is
//! checked exactly. The only tolerance is between the caller's subtotal and
//! the sum of the lines, for front-ends that round per line differently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::types::PaymentMethod;
use crate::validation::{validate_extended_amount, validate_non_negative, validate_quantity};

// =============================================================================
// Line Totals
// =============================================================================

/// `quantity × unit_price − discount`, rejected when negative.
///
/// ```rust
/// use kasir_core::money::Money;
/// use kasir_core::sale::line_total;
///
/// let total = line_total(3, Money::from_minor(1500), Money::from_minor(500)).unwrap();
/// assert_eq!(total.minor(), 4000);
/// assert!(line_total(1, Money::from_minor(1500), Money::from_minor(2000)).is_err());
/// ```
pub fn line_total(quantity: i64, unit_price: Money, discount: Money) -> CoreResult<Money> {
    validate_quantity(quantity)?;
    validate_non_negative("unit_price", unit_price)?;
    validate_non_negative("item discount", discount)?;

    let gross = validate_extended_amount("item total", unit_price, quantity)?;
    let total = gross - discount;
    if total.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: "item total".to_string(),
            min: 0,
            max: gross.minor(),
        }
        .into());
    }

    Ok(total)
}

// =============================================================================
// Sale Totals
// =============================================================================

/// Header figures of a sale as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

impl SaleTotals {
    /// Derives consistent totals from the line sum.
    pub fn from_lines(lines_sum: Money, discount: Money, tax: Money) -> Self {
        Self {
            subtotal: lines_sum,
            discount,
            tax,
            total: lines_sum - discount + tax,
        }
    }

    /// Checks the caller's figures against the lines they claim to cover.
    ///
    /// ## Rules (in order)
    /// 1. `total > 0`
    /// 2. subtotal, discount, tax, total and the line sum are non-negative
    ///    and at most `MAX_MONEY_MINOR`
    /// 3. `total == subtotal − discount + tax`
    /// 4. `|subtotal − lines_sum| <= tolerance`
    pub fn reconcile(&self, lines_sum: Money, tolerance: Money) -> CoreResult<()> {
        if !self.total.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "total".to_string(),
            }
            .into());
        }

        validate_non_negative("subtotal", self.subtotal)?;
        validate_non_negative("discount", self.discount)?;
        validate_non_negative("tax", self.tax)?;
        validate_non_negative("total", self.total)?;
        validate_non_negative("lines", lines_sum)?;

        // All five figures are within [0, MAX_MONEY_MINOR] from here on.
        let expected = self.subtotal - self.discount + self.tax;
        if expected != self.total {
            return Err(ValidationError::Inconsistent {
                field: "total".to_string(),
                expected: expected.minor(),
                actual: self.total.minor(),
            }
            .into());
        }

        if (self.subtotal - lines_sum).abs() > tolerance {
            return Err(ValidationError::Inconsistent {
                field: "subtotal".to_string(),
                expected: lines_sum.minor(),
                actual: self.subtotal.minor(),
            }
            .into());
        }

        Ok(())
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Payment handed over at finalize time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Tender {
    pub paid: Money,
    pub method: PaymentMethod,
}

/// What a finalized sale records about payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub paid: Money,
    pub change: Money,
    pub method: PaymentMethod,
}

/// Settles `total` against an optional tender.
///
/// Without a tender the sale is treated as paid exactly, with the given
/// fallback method.
pub fn settle(total: Money, tender: Option<Tender>, fallback: PaymentMethod) -> CoreResult<Settlement> {
    let tender = tender.unwrap_or(Tender {
        paid: total,
        method: fallback,
    });

    validate_non_negative("paid", tender.paid)?;
    if tender.paid < total {
        return Err(ValidationError::OutOfRange {
            field: "paid".to_string(),
            min: total.minor(),
            max: i64::MAX,
        }
        .into());
    }

    Ok(Settlement {
        paid: tender.paid,
        change: tender.paid - total,
        method: tender.method,
    })
}

// =============================================================================
// Invoice Numbers
// =============================================================================

/// Formats an invoice number: `PREFIX-YYYYMMDD-HHMMSS`, with a two-digit
/// suffix from the second attempt on.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use kasir_core::sale::invoice_number;
///
/// let at = Utc.with_ymd_and_hms(2026, 10, 18, 10, 15, 0).unwrap();
/// assert_eq!(invoice_number("INV", at, 0), "INV-20261018-101500");
/// assert_eq!(invoice_number("INV", at, 2), "INV-20261018-101500-02");
/// ```
pub fn invoice_number(prefix: &str, at: DateTime<Utc>, attempt: u32) -> String {
    let base = format!("{}-{}", prefix, at.format("%Y%m%d-%H%M%S"));
    if attempt == 0 {
        base
    } else {
        format!("{}-{:02}", base, attempt)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
