//! # kasir-core: Pure Business Logic for the Kasir Ledger
//!
//! This crate holds the rules of the inventory-and-sales ledger as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kasir POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Outer API (HTTP / CLI, not in this repo)           │   │
//! │  │    CreateSale ── FinalizeSale ── ReceiveStock ── ComputeHPP     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                kasir-db (services + repositories)               │   │
//! │  │    SaleService, InventoryService, FinanceService, SQLite        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kasir-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ │   │
//! │  │   │  types  │ │  money  │ │ ledger  │ │  sale   │ │ report  │ │   │
//! │  │   │ Product │ │  Money  │ │  sign   │ │ totals  │ │  HPP    │ │   │
//! │  │   │  Sale   │ │ TaxRate │ │  chain  │ │ invoice │ │ margins │ │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, StockMovement, Expense)
//! - [`money`] - Integer money in minor units
//! - [`ledger`] - Movement sign discipline and chain verification
//! - [`sale`] - Line totals, sale totals, invoice numbers
//! - [`report`] - HPP, margins, low-stock and stock-value math
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use kasir_core::money::Money;
//! use kasir_core::sale::line_total;
//!
//! let total = line_total(3, Money::from_minor(1500), Money::zero()).unwrap();
//! assert_eq!(total.minor(), 4500);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod money;
pub mod report;
pub mod sale;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines on a single sale.
pub const MAX_SALE_ITEMS: usize = 100;

/// Maximum base units on a single line or stock operation.
///
/// Guards against a scanner or keypad mishap (10000 typed instead of 10)
/// while leaving room for alternate units such as `dus` of 24.
pub const MAX_ITEM_QUANTITY: i64 = 100_000;

/// Largest amount accepted from a caller, in minor units (Rp 1.000 triliun).
///
/// Any single price, cost, payment or header figure above this is rejected.
/// Sums of bounded figures over [`MAX_SALE_ITEMS`] lines stay inside `i64`.
pub const MAX_MONEY_MINOR: i64 = 1_000_000_000_000_000;

/// Prefix of generated invoice numbers.
pub const DEFAULT_INVOICE_PREFIX: &str = "INV";

/// How many times an invoice number collision is regenerated before the
/// sale fails.
pub const DEFAULT_INVOICE_RETRIES: u32 = 5;
