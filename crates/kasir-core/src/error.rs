//! # Error Types
//!
//! Domain-specific error types for kasir-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kasir-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kasir-db errors (separate crate)                                      │
//! │  └── DbError          - Persistence failures + wrapped CoreError       │
//! │                                                                         │
//! │  Outer API                                                             │
//! │  └── ApiError         - { code, message } with HTTP status mapping     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Caller       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Errors are enum variants, never String
//! 2. Include context in error messages (product, invoice, quantities)
//! 3. Validation errors never touch storage; they are raised before a
//!    transaction is opened

use thiserror::Error;

use crate::types::MovementType;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Product missing or soft-deleted.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Sale missing or soft-deleted.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Requested quantity exceeds what is on hand.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (qty: 5 Teh Botol)
    ///      │
    ///      ▼
    /// Conditional decrement: stock=3, needs 5
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }  (shortfall 2)
    ///      │
    ///      ▼
    /// Whole sale rolled back, cashier decides what to do
    /// ```
    #[error(
        "Insufficient stock for {product_name}: available {available}, requested {requested} (short by {})",
        .requested - .available
    )]
    InsufficientStock {
        product_id: String,
        product_name: String,
        available: i64,
        requested: i64,
    },

    /// Finalize called on a sale that is no longer a draft.
    #[error("Sale {invoice_number} is already finalized")]
    AlreadyFinalized { invoice_number: String },

    /// Any other state-machine violation.
    #[error("Sale {invoice_number} is {state}, cannot {operation}")]
    InvalidSaleState {
        invoice_number: String,
        state: String,
        operation: String,
    },

    /// Adjustment to the stock level the product already has.
    #[error("Stock of {product_name} is already {stock}, nothing to adjust")]
    NoOpAdjustment { product_name: String, stock: i64 },

    /// A ledger entry whose endpoints disagree with its movement type.
    #[error("Ledger entry for {product_id} violates {movement_type} rule: {reason}")]
    LedgerInvariant {
        product_id: String,
        movement_type: MovementType,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Missing quantity for an `InsufficientStock` error.
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            CoreError::InsufficientStock {
                available,
                requested,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Caller-supplied figures that do not reconcile.
    #[error("{field} is inconsistent: expected {expected}, got {actual}")]
    Inconsistent {
        field: String,
        expected: i64,
        actual: i64,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
