//! # Ledger Rules
//!
//! The stock movement ledger is append-only. This module holds the rules an
//! entry must satisfy before it is appended, and the continuity check run
//! over stored history.
//!
//! ## Sign Discipline
//! ```text
//! ┌──────────────┬────────────┬──────────────────────────────────────────┐
//! │ type         │ direction  │ rule                                     │
//! ├──────────────┼────────────┼──────────────────────────────────────────┤
//! │ in           │ inbound    │ after − before = +quantity               │
//! │ out          │ outbound   │ after − before = −quantity               │
//! │ damaged      │ outbound   │ after − before = −quantity               │
//! │ expired      │ outbound   │ after − before = −quantity               │
//! │ adjustment   │ signed     │ |after − before| = quantity, ≠ 0         │
//! └──────────────┴────────────┴──────────────────────────────────────────┘
//! ```
//!
//! ## Chain Continuity
//! For one product, sorted by insertion sequence:
//! ```text
//!   entry n   : before=10 after=7
//!   entry n+1 : before=7  after=27     ✓ before(n+1) == after(n)
//!   entry n+2 : before=25 after=24     ✗ gap of 2 → ChainBreak
//! ```

use serde::Serialize;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{MovementDirection, MovementReference, MovementType, StockMovement};
use crate::validation::{validate_extended_amount, validate_non_negative};

// =============================================================================
// Append Input
// =============================================================================

/// A ledger entry about to be appended.
///
/// Built by the writers (sale and inventory services) from the endpoints
/// returned by the stock primitive that ran in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockMovement {
    pub product_id: String,
    pub product_name: String,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub unit_cost: Money,
    pub reference: MovementReference,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

impl NewStockMovement {
    /// Entry for a change of `delta` that moved stock from `before` to
    /// `before + delta`. The quantity is the magnitude of `delta`.
    pub fn for_delta(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        movement_type: MovementType,
        before: i64,
        delta: i64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            movement_type,
            quantity: delta.abs(),
            quantity_before: before,
            quantity_after: before + delta,
            unit_cost: Money::zero(),
            reference: MovementReference::Manual,
            notes: None,
            created_by: None,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Money) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    pub fn with_reference(mut self, reference: MovementReference) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_created_by(mut self, created_by: Option<String>) -> Self {
        self.created_by = created_by;
        self
    }

    /// `unit_cost × quantity`, rejected when out of the accepted range.
    pub fn total_cost(&self) -> CoreResult<Money> {
        Ok(validate_extended_amount("total_cost", self.unit_cost, self.quantity)?)
    }

    /// Checks the entry against its movement type's rule.
    pub fn validate(&self) -> CoreResult<()> {
        validate_entry(
            &self.product_id,
            self.movement_type,
            self.quantity,
            self.quantity_before,
            self.quantity_after,
        )?;

        validate_non_negative("unit_cost", self.unit_cost)?;
        self.total_cost()?;

        Ok(())
    }
}

// =============================================================================
// Entry Validation
// =============================================================================

/// Validates one entry's endpoints against its movement type.
///
/// ```rust
/// use kasir_core::ledger::validate_entry;
/// use kasir_core::types::MovementType;
///
/// assert!(validate_entry("p-1", MovementType::Out, 3, 10, 7).is_ok());
/// assert!(validate_entry("p-1", MovementType::Out, 3, 10, 13).is_err());
/// assert!(validate_entry("p-1", MovementType::Adjustment, 3, 10, 13).is_ok());
/// ```
pub fn validate_entry(
    product_id: &str,
    movement_type: MovementType,
    quantity: i64,
    before: i64,
    after: i64,
) -> CoreResult<()> {
    let violation = |reason: String| CoreError::LedgerInvariant {
        product_id: product_id.to_string(),
        movement_type,
        reason,
    };

    if quantity <= 0 {
        return Err(violation(format!("quantity must be positive, got {}", quantity)));
    }

    if before < 0 || after < 0 {
        return Err(violation(format!(
            "stock cannot be negative (before {}, after {})",
            before, after
        )));
    }

    let delta = after - before;
    match movement_type.direction() {
        MovementDirection::Inbound if delta != quantity => Err(violation(format!(
            "expected +{}, recorded {:+}",
            quantity, delta
        ))),
        MovementDirection::Outbound if delta != -quantity => Err(violation(format!(
            "expected -{}, recorded {:+}",
            quantity, delta
        ))),
        MovementDirection::Signed if delta == 0 => {
            Err(violation("adjustment must change stock".to_string()))
        }
        MovementDirection::Signed if delta.abs() != quantity => Err(violation(format!(
            "quantity {} does not match recorded change {:+}",
            quantity, delta
        ))),
        _ => Ok(()),
    }
}

/// Classifies a write-off by its free-text reason.
///
/// Reasons mentioning expiry ("expired", "kadaluarsa", "kedaluwarsa") are
/// recorded as `expired`; anything else is `damaged`.
pub fn damage_movement_type(reason: &str) -> MovementType {
    let reason = reason.to_lowercase();
    let expired = ["expired", "kadaluarsa", "kedaluwarsa"]
        .iter()
        .any(|marker| reason.contains(marker));

    if expired {
        MovementType::Expired
    } else {
        MovementType::Damaged
    }
}

// =============================================================================
// Chain Verification
// =============================================================================

/// A defect found while walking a product's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum ChainDefect {
    /// `quantity_before` does not continue from the previous entry.
    Gap {
        sequence: i64,
        expected_before: i64,
        actual_before: i64,
    },
    /// Entry endpoints disagree with its type.
    BadEntry { sequence: i64, reason: String },
    /// The live stock counter drifted from the last entry.
    CounterDrift { ledger_after: i64, live_stock: i64 },
}

/// Outcome of auditing one product's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ChainReport {
    pub product_id: String,
    pub entries: usize,
    /// `quantity_after` of the last entry, `None` for an empty history.
    pub last_after: Option<i64>,
    /// Sum of all signed deltas.
    pub net_delta: i64,
    pub defects: Vec<ChainDefect>,
}

impl ChainReport {
    pub fn is_consistent(&self) -> bool {
        self.defects.is_empty()
    }

    /// Adds a drift defect when the live counter disagrees with history.
    pub fn check_live_stock(&mut self, live_stock: i64) {
        let expected = self.last_after.unwrap_or(0);
        if expected != live_stock {
            self.defects.push(ChainDefect::CounterDrift {
                ledger_after: expected,
                live_stock,
            });
        }
    }
}

/// Walks one product's movements in insertion order.
///
/// Movements of other products are ignored; the input need not be sorted.
pub fn verify_chain(product_id: &str, movements: &[StockMovement]) -> ChainReport {
    let mut own: Vec<&StockMovement> = movements
        .iter()
        .filter(|m| m.product_id == product_id)
        .collect();
    own.sort_by_key(|m| m.sequence);

    let mut defects = Vec::new();
    let mut previous_after: Option<i64> = None;
    let mut net_delta = 0;

    for m in &own {
        if let Err(err) = validate_entry(
            &m.product_id,
            m.movement_type,
            m.quantity,
            m.quantity_before,
            m.quantity_after,
        ) {
            defects.push(ChainDefect::BadEntry {
                sequence: m.sequence,
                reason: err.to_string(),
            });
        }

        if let Some(expected) = previous_after {
            if m.quantity_before != expected {
                defects.push(ChainDefect::Gap {
                    sequence: m.sequence,
                    expected_before: expected,
                    actual_before: m.quantity_before,
                });
            }
        }

        net_delta += m.delta();
        previous_after = Some(m.quantity_after);
    }

    ChainReport {
        product_id: product_id.to_string(),
        entries: own.len(),
        last_after: previous_after,
        net_delta,
        defects,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use chrono::Utc;

    fn movement(seq: i64, kind: MovementType, qty: i64, before: i64, after: i64) -> StockMovement {
        StockMovement {
            sequence: seq,
            id: format!("m-{}", seq),
            product_id: "p-1".to_string(),
            product_name: "Teh Botol".to_string(),
            movement_type: kind,
            quantity: qty,
            quantity_before: before,
            quantity_after: after,
            unit_cost: Money::zero(),
            total_cost: Money::zero(),
            reference_type: None,
            reference_id: None,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_inbound_and_outbound_signs() {
        assert!(validate_entry("p", MovementType::In, 5, 0, 5).is_ok());
        assert!(validate_entry("p", MovementType::In, 5, 5, 0).is_err());
        assert!(validate_entry("p", MovementType::Damaged, 2, 7, 5).is_ok());
        assert!(validate_entry("p", MovementType::Expired, 2, 7, 9).is_err());
    }

    #[test]
    fn test_adjustment_rules() {
        assert!(validate_entry("p", MovementType::Adjustment, 3, 10, 7).is_ok());
        assert!(validate_entry("p", MovementType::Adjustment, 3, 7, 10).is_ok());
        assert!(validate_entry("p", MovementType::Adjustment, 3, 7, 11).is_err());

        let err = validate_entry("p", MovementType::Adjustment, 1, 7, 7).unwrap_err();
        assert!(matches!(err, CoreError::LedgerInvariant { .. }));
    }

    #[test]
    fn test_rejects_non_positive_quantity_and_negative_stock() {
        assert!(validate_entry("p", MovementType::In, 0, 5, 5).is_err());
        assert!(validate_entry("p", MovementType::Out, 3, 2, -1).is_err());
    }

    #[test]
    fn test_for_delta_builds_valid_entry() {
        let entry = NewStockMovement::for_delta("p-1", "Teh Botol", MovementType::Adjustment, 10, -3);
        assert_eq!(entry.quantity, 3);
        assert_eq!(entry.quantity_after, 7);
        assert!(entry.validate().is_ok());

        let received = NewStockMovement::for_delta("p-1", "Teh Botol", MovementType::In, 7, 20)
            .with_unit_cost(Money::from_minor(1200));
        assert_eq!(received.total_cost().unwrap().minor(), 24_000);

        let overpriced = received.with_unit_cost(Money::from_minor(crate::MAX_MONEY_MINOR));
        assert!(matches!(
            overpriced.validate(),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_verify_chain_accepts_continuous_history() {
        let history = vec![
            movement(1, MovementType::In, 10, 0, 10),
            movement(2, MovementType::Out, 3, 10, 7),
            movement(4, MovementType::In, 20, 7, 27),
            movement(5, MovementType::Adjustment, 2, 27, 25),
        ];

        let mut report = verify_chain("p-1", &history);
        assert!(report.is_consistent());
        assert_eq!(report.entries, 4);
        assert_eq!(report.last_after, Some(25));
        assert_eq!(report.net_delta, 25);

        report.check_live_stock(25);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_verify_chain_reports_gap_and_drift() {
        // out of order on purpose; sequence decides
        let history = vec![
            movement(3, MovementType::Out, 1, 8, 7),
            movement(1, MovementType::In, 10, 0, 10),
        ];

        let mut report = verify_chain("p-1", &history);
        assert_eq!(
            report.defects,
            vec![ChainDefect::Gap {
                sequence: 3,
                expected_before: 10,
                actual_before: 8
            }]
        );

        report.check_live_stock(9);
        assert_eq!(report.defects.len(), 2);
    }

    #[test]
    fn test_verify_chain_flags_bad_entry() {
        let history = vec![movement(1, MovementType::Out, 3, 10, 13)];
        let report = verify_chain("p-1", &history);
        assert!(matches!(report.defects[0], ChainDefect::BadEntry { sequence: 1, .. }));
    }

    #[test]
    fn test_empty_history() {
        let mut report = verify_chain("p-1", &[]);
        assert_eq!(report.entries, 0);
        assert_eq!(report.last_after, None);
        report.check_live_stock(0);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_damage_movement_type() {
        assert_eq!(damage_movement_type("expired"), MovementType::Expired);
        assert_eq!(damage_movement_type("Sudah KADALUARSA"), MovementType::Expired);
        assert_eq!(damage_movement_type("kemasan sobek"), MovementType::Damaged);
        assert_eq!(damage_movement_type(""), MovementType::Damaged);
    }
}
