//! # Domain Types
//!
//! Core domain types of the inventory-and-sales ledger.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │  StockMovement  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  code, barcode  │   │  invoice_number │   │  movement_type  │       │
//! │  │  purchase_price │◄──│  is_draft       │──►│  qty before/    │       │
//! │  │  selling_price  │   │  is_active      │   │      after      │       │
//! │  │  stock (live)   │   │  SaleItem[]     │   │  reference      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  MovementType   │   │   SaleState     │   │    Expense      │       │
//! │  │  In / Out       │   │  Draft          │   │  amount         │       │
//! │  │  Adjustment     │   │  Finalized      │   │  category       │       │
//! │  │  Damaged        │   │  Deleted        │   │  (net profit)   │       │
//! │  │  Expired        │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Rule
//! Sale items and stock movements copy the product name (and price/cost) at
//! write time. Products are only ever soft-deleted, and history never needs
//! the live product row to render.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points. 1100 bps = 11% (PPN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Category (external collaborator)
// =============================================================================

/// A product category as seen by the ledger.
///
/// Category CRUD lives outside this crate; the catalog only needs to know
/// whether a `category_id` resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub prefix: String,
}

/// Lookup port onto the category store.
pub trait CategoryLookup {
    fn category_by_id(&self, id: &str) -> Option<Category>;
}

/// No categories at all. Any `category_id` is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCategories;

impl CategoryLookup for NoCategories {
    fn category_by_id(&self, _id: &str) -> Option<Category> {
        None
    }
}

impl CategoryLookup for std::collections::HashMap<String, Category> {
    fn category_by_id(&self, id: &str) -> Option<Category> {
        self.get(id).cloned()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product in the catalog.
///
/// `stock` is the authoritative on-hand quantity in base units. It is only
/// ever changed by an operation that appends a [`StockMovement`] in the same
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    /// Unique business code (e.g. `MNM-0001`).
    pub code: String,
    /// Unique when present.
    pub barcode: Option<String>,
    pub name: String,
    pub category_id: Option<String>,
    /// Cost basis. Only raised automatically, never lowered.
    pub purchase_price: Money,
    pub selling_price: Money,
    pub stock: i64,
    /// Base unit, e.g. `pcs`.
    pub unit: String,
    /// Alternate unit, e.g. `dus`.
    pub alt_unit: Option<String>,
    /// Base units per alternate unit.
    pub alt_unit_factor: Option<i64>,
    pub min_stock: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Converts a quantity expressed in `unit` into base units.
    ///
    /// `None` or the base unit name means the quantity is already in base
    /// units. The alternate unit is multiplied by its conversion factor.
    pub fn to_base_quantity(&self, quantity: i64, unit: Option<&str>) -> Result<i64, ValidationError> {
        let unit = match unit.map(str::trim) {
            None | Some("") => return Ok(quantity),
            Some(u) => u,
        };

        if unit.eq_ignore_ascii_case(&self.unit) {
            return Ok(quantity);
        }

        match (&self.alt_unit, self.alt_unit_factor) {
            (Some(alt), Some(factor)) if unit.eq_ignore_ascii_case(alt) => {
                quantity
                    .checked_mul(factor)
                    .ok_or_else(|| ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: 1,
                        max: i64::MAX / factor.max(1),
                    })
            }
            _ => {
                let mut allowed = vec![self.unit.clone()];
                allowed.extend(self.alt_unit.clone());
                Err(ValidationError::NotAllowed {
                    field: "unit".to_string(),
                    allowed,
                })
            }
        }
    }

    /// Low-stock classification, `None` while stock is above `min_stock`.
    pub fn stock_status(&self) -> Option<StockStatus> {
        if self.stock > self.min_stock {
            return None;
        }
        if self.stock <= 0 {
            Some(StockStatus::Habis)
        } else {
            Some(StockStatus::Menipis)
        }
    }

    /// Whether `quantity` base units can leave stock right now.
    #[inline]
    pub fn can_sell(&self, quantity: i64) -> bool {
        self.stock >= quantity
    }
}

/// Low-stock tag used by the reorder report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StockStatus {
    /// Out of stock.
    Habis,
    /// Running low.
    Menipis,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// The cause of a stock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MovementType {
    /// Receiving / opening stock.
    In,
    /// Sale.
    Out,
    /// Operator recount; sign follows the delta.
    Adjustment,
    Damaged,
    Expired,
}

/// Direction a movement type moves stock in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementDirection {
    Inbound,
    Outbound,
    /// Either way; the recorded endpoints carry the sign.
    Signed,
}

impl MovementType {
    pub const ALL: [MovementType; 5] = [
        MovementType::In,
        MovementType::Out,
        MovementType::Adjustment,
        MovementType::Damaged,
        MovementType::Expired,
    ];

    pub const fn direction(&self) -> MovementDirection {
        match self {
            MovementType::In => MovementDirection::Inbound,
            MovementType::Out | MovementType::Damaged | MovementType::Expired => {
                MovementDirection::Outbound
            }
            MovementType::Adjustment => MovementDirection::Signed,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
            MovementType::Damaged => "damaged",
            MovementType::Expired => "expired",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" | "receiving" => Ok(MovementType::In),
            "out" | "sale" => Ok(MovementType::Out),
            "adjustment" => Ok(MovementType::Adjustment),
            "damaged" | "rusak" => Ok(MovementType::Damaged),
            "expired" | "kadaluarsa" => Ok(MovementType::Expired),
            _ => Err(ValidationError::NotAllowed {
                field: "movement_type".to_string(),
                allowed: MovementType::ALL.iter().map(|t| t.to_string()).collect(),
            }),
        }
    }
}

/// Stored discriminator of what caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ReferenceType {
    Sale,
    Purchase,
    Opening,
}

/// What caused a movement, with its linked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementReference {
    Sale { sale_id: String },
    Purchase { supplier_ref: Option<String> },
    Opening,
    /// Operator-initiated; no linked record.
    Manual,
}

impl MovementReference {
    /// Splits into the `(reference_type, reference_id)` columns.
    pub fn into_parts(self) -> (Option<ReferenceType>, Option<String>) {
        match self {
            MovementReference::Sale { sale_id } => (Some(ReferenceType::Sale), Some(sale_id)),
            MovementReference::Purchase { supplier_ref } => {
                (Some(ReferenceType::Purchase), supplier_ref)
            }
            MovementReference::Opening => (Some(ReferenceType::Opening), None),
            MovementReference::Manual => (None, None),
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    /// Insertion order, strictly increasing.
    pub sequence: i64,
    pub id: String,
    pub product_id: String,
    /// Product name at movement time.
    pub product_name: String,
    pub movement_type: MovementType,
    /// Unsigned magnitude of the change.
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub unit_cost: Money,
    pub total_cost: Money,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Signed change this entry applied.
    #[inline]
    pub fn delta(&self) -> i64 {
        self.quantity_after - self.quantity_before
    }

    pub fn reference(&self) -> MovementReference {
        match self.reference_type {
            Some(ReferenceType::Sale) => MovementReference::Sale {
                sale_id: self.reference_id.clone().unwrap_or_default(),
            },
            Some(ReferenceType::Purchase) => MovementReference::Purchase {
                supplier_ref: self.reference_id.clone(),
            },
            Some(ReferenceType::Opening) => MovementReference::Opening,
            None => MovementReference::Manual,
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PaymentMethod {
    #[default]
    Cash,
    Transfer,
    Qris,
    Card,
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" | "tunai" => Ok(PaymentMethod::Cash),
            "transfer" => Ok(PaymentMethod::Transfer),
            "qris" => Ok(PaymentMethod::Qris),
            "card" | "debit" | "credit" => Ok(PaymentMethod::Card),
            _ => Err(ValidationError::NotAllowed {
                field: "payment_method".to_string(),
                allowed: vec![
                    "cash".to_string(),
                    "transfer".to_string(),
                    "qris".to_string(),
                    "card".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

/// Lifecycle position of a sale.
///
/// ```text
///   Draft ──finalize──► Finalized
///     │                     │
///     └──────delete─────────┴──► Deleted (soft)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SaleState {
    Draft,
    Finalized,
    Deleted,
}

impl fmt::Display for SaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleState::Draft => f.write_str("draft"),
            SaleState::Finalized => f.write_str("finalized"),
            SaleState::Deleted => f.write_str("deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub invoice_number: String,
    pub customer_name: Option<String>,
    pub cashier: Option<String>,
    pub notes: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
    pub paid: Money,
    pub change_amount: Money,
    pub payment_method: PaymentMethod,
    pub is_draft: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Sale {
    pub fn state(&self) -> SaleState {
        if !self.is_active {
            SaleState::Deleted
        } else if self.is_draft {
            SaleState::Draft
        } else {
            SaleState::Finalized
        }
    }
}

/// A line of a sale. Never mutated on its own; a draft edit replaces the
/// whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// Product name at time of sale.
    pub product_name: String,
    /// Base units.
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
    /// `quantity × unit_price − discount`.
    pub total: Money,
    /// Purchase price captured when the stock left. `None` on drafts.
    pub unit_cost: Option<Money>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Sale header with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleWithItems {
    #[serde(flatten)]
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

// =============================================================================
// Expense
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Expense {
    pub id: String,
    pub description: String,
    pub category: String,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    #[ts(as = "String")]
    pub expense_date: DateTime<Utc>,
    pub created_by: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
