//! # Product Repository
//!
//! Catalog operations and the stock primitives.
//!
//! ## Stock Primitives
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                                │
//! │                                                                         │
//! │  ❌ WRONG: read in app code, then write                                 │
//! │     SELECT stock → 5 (both cashiers see 5)                             │
//! │     UPDATE products SET stock = 2   (cashier A, sold 3)                │
//! │     UPDATE products SET stock = 1   (cashier B, sold 4) → oversold     │
//! │                                                                         │
//! │  ✅ CORRECT: conditional decrement, one statement                       │
//! │     UPDATE products SET stock = stock - ?                              │
//! │     WHERE id = ? AND stock >= ?  RETURNING stock                       │
//! │                                                                         │
//! │  No row back → either missing, or not enough stock. A second read     │
//! │  tells them apart for the error message.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The primitives take `&mut SqliteConnection` and never write the ledger;
//! the services call them inside the transaction that appends the entry.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use kasir_core::ledger::NewStockMovement;
use kasir_core::validation::{
    normalize_optional, validate_alt_unit, validate_barcode, validate_code, validate_label,
    validate_non_negative, validate_positive, validate_product_name, validate_quantity,
    validate_stock_level,
};
use kasir_core::{
    CategoryLookup, CoreError, Money, MovementReference, MovementType, Product, ValidationError,
};

use crate::error::{DbError, DbResult};
use crate::repository::ledger::StockMovementRepository;

pub(crate) const PRODUCT_COLUMNS: &str = "id, code, barcode, name, category_id, purchase_price, \
     selling_price, stock, unit, alt_unit, alt_unit_factor, min_stock, is_active, \
     created_at, updated_at";

// =============================================================================
// Inputs
// =============================================================================

/// Editable catalog fields. Stock is never among them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub barcode: Option<String>,
    pub category_id: Option<String>,
    pub purchase_price: Money,
    pub selling_price: Money,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub alt_unit: Option<String>,
    pub alt_unit_factor: Option<i64>,
    #[serde(default)]
    pub min_stock: i64,
}

fn default_unit() -> String {
    "pcs".to_string()
}

impl ProductDetails {
    /// Validates and normalizes the fields.
    fn validate(self, categories: &dyn CategoryLookup) -> Result<Self, ValidationError> {
        validate_product_name(&self.name)?;
        validate_non_negative("purchase_price", self.purchase_price)?;
        validate_positive("selling_price", self.selling_price)?;
        validate_label("unit", &self.unit, 20)?;
        validate_alt_unit(self.alt_unit.as_deref(), self.alt_unit_factor)?;
        validate_stock_level(self.min_stock).map_err(|_| ValidationError::OutOfRange {
            field: "min_stock".to_string(),
            min: 0,
            max: i64::MAX,
        })?;

        let barcode = normalize_optional("barcode", self.barcode.as_deref(), 14)?;
        if let Some(code) = &barcode {
            validate_barcode(code)?;
        }

        let category_id = normalize_optional("category_id", self.category_id.as_deref(), 64)?;
        if let Some(id) = &category_id {
            if categories.category_by_id(id).is_none() {
                return Err(ValidationError::InvalidFormat {
                    field: "category_id".to_string(),
                    reason: format!("unknown category '{}'", id),
                });
            }
        }

        let alt_unit = normalize_optional("alt_unit", self.alt_unit.as_deref(), 20)?;

        Ok(ProductDetails {
            name: self.name.trim().to_string(),
            barcode,
            category_id,
            unit: self.unit.trim().to_string(),
            alt_unit_factor: alt_unit.as_ref().and(self.alt_unit_factor),
            alt_unit,
            ..self
        })
    }
}

/// A product to create.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewProduct {
    pub code: String,
    #[serde(flatten)]
    pub details: ProductDetails,
    /// Opening stock, recorded as an `in` entry.
    #[serde(default)]
    pub opening_stock: i64,
    pub created_by: Option<String>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let product = repo.create(new_product, &categories).await?;
/// let same = repo.get_by_code("MNM-0001").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a product by its ID, active or not.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets an active product, `ProductNotFound` otherwise.
    pub async fn get_active(&self, id: &str) -> DbResult<Product> {
        match self.get_by_id(id).await? {
            Some(product) if product.is_active => Ok(product),
            _ => Err(CoreError::ProductNotFound(id.to_string()).into()),
        }
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE code = ?", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE barcode = ?", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(barcode.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Active products sorted by name. `None` lists all of them.
    pub async fn list_active(&self, limit: Option<u32>) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products WHERE is_active = 1 ORDER BY name LIMIT ?",
            PRODUCT_COLUMNS
        );
        let limit = limit.map(i64::from).unwrap_or(-1);
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Active products at or below their `min_stock`.
    pub async fn list_at_or_below_minimum(&self) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products
             WHERE is_active = 1 AND stock <= min_stock
             ORDER BY stock, name",
            PRODUCT_COLUMNS
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Catalog Writes
    // =========================================================================

    /// Creates a product, recording opening stock in the ledger.
    ///
    /// ## Errors
    /// - `ValidationError::Duplicate` for a taken code or barcode
    /// - `ValidationError::InvalidFormat` for an unknown category
    pub async fn create(
        &self,
        new: NewProduct,
        categories: &dyn CategoryLookup,
    ) -> DbResult<Product> {
        validate_code(&new.code)?;
        validate_stock_level(new.opening_stock)?;
        if new.opening_stock > 0 {
            validate_quantity(new.opening_stock)?;
        }
        let details = new.details.validate(categories)?;
        let code = new.code.trim().to_string();

        if self.get_by_code(&code).await?.is_some() {
            return Err(ValidationError::Duplicate {
                field: "code".to_string(),
                value: code,
            }
            .into());
        }
        if let Some(barcode) = &details.barcode {
            if self.get_by_barcode(barcode).await?.is_some() {
                return Err(ValidationError::Duplicate {
                    field: "barcode".to_string(),
                    value: barcode.clone(),
                }
                .into());
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(code = %code, "Inserting product");

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO products (
                id, code, barcode, name, category_id, purchase_price, selling_price,
                stock, unit, alt_unit, alt_unit_factor, min_stock, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(&id)
            .bind(&code)
            .bind(&details.barcode)
            .bind(&details.name)
            .bind(&details.category_id)
            .bind(details.purchase_price)
            .bind(details.selling_price)
            .bind(new.opening_stock)
            .bind(&details.unit)
            .bind(&details.alt_unit)
            .bind(details.alt_unit_factor)
            .bind(details.min_stock)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| duplicate_field(e, &code))?;

        if new.opening_stock > 0 {
            let entry = NewStockMovement::for_delta(
                &product.id,
                &product.name,
                MovementType::In,
                0,
                new.opening_stock,
            )
            .with_unit_cost(product.purchase_price)
            .with_reference(MovementReference::Opening)
            .with_created_by(new.created_by.clone());
            StockMovementRepository::append_in(&mut *tx, &entry).await?;
        }

        tx.commit().await?;

        info!(
            product_id = %product.id,
            code = %product.code,
            opening_stock = new.opening_stock,
            "Product created"
        );
        Ok(product)
    }

    /// Replaces the editable fields of an active product.
    pub async fn update_details(
        &self,
        id: &str,
        details: ProductDetails,
        categories: &dyn CategoryLookup,
    ) -> DbResult<Product> {
        let details = details.validate(categories)?;

        if let Some(barcode) = &details.barcode {
            if let Some(other) = self.get_by_barcode(barcode).await? {
                if other.id != id {
                    return Err(ValidationError::Duplicate {
                        field: "barcode".to_string(),
                        value: barcode.clone(),
                    }
                    .into());
                }
            }
        }

        debug!(id = %id, "Updating product details");

        let sql = format!(
            "UPDATE products SET
                name = ?, barcode = ?, category_id = ?, purchase_price = ?,
                selling_price = ?, unit = ?, alt_unit = ?, alt_unit_factor = ?,
                min_stock = ?, updated_at = ?
            WHERE id = ? AND is_active = 1
            RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(&details.name)
            .bind(&details.barcode)
            .bind(&details.category_id)
            .bind(details.purchase_price)
            .bind(details.selling_price)
            .bind(&details.unit)
            .bind(&details.alt_unit)
            .bind(details.alt_unit_factor)
            .bind(details.min_stock)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        product.ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// Soft-deletes a product. Sale items and ledger entries keep their
    /// name snapshots, so history still renders.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting product");

        let result = sqlx::query(
            "UPDATE products SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ProductNotFound(id.to_string()).into());
        }

        info!(product_id = %id, "Product soft-deleted");
        Ok(())
    }

    // =========================================================================
    // Stock Primitives (caller's transaction)
    // =========================================================================

    /// Reads an active product on the caller's connection.
    pub async fn fetch_active_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Product> {
        let sql = format!(
            "SELECT {} FROM products WHERE id = ? AND is_active = 1",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        product.ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// Touches the row and returns it.
    ///
    /// Used as the first statement of a transaction that must read stock
    /// before writing it, so the transaction holds the write lock from the
    /// start and cannot fail a read-to-write upgrade.
    pub async fn lock_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Product> {
        let sql = format!(
            "UPDATE products SET updated_at = ? WHERE id = ? AND is_active = 1 RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        product.ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// `stock += delta` as one statement. Returns the updated product.
    ///
    /// Does not itself forbid a negative result; the schema's
    /// `CHECK (stock >= 0)` does.
    pub async fn adjust_stock_in(
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> DbResult<Product> {
        debug!(id = %id, delta = delta, "Adjusting stock");

        let sql = format!(
            "UPDATE products SET stock = stock + ?, updated_at = ?
             WHERE id = ? AND is_active = 1
             RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(delta)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        product.ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// Conditional decrement: `stock -= quantity` only if enough is on hand.
    ///
    /// ## Errors
    /// - `ProductNotFound` if missing or inactive
    /// - `InsufficientStock` with the stock seen by this transaction
    pub async fn try_decrement_in(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<Product> {
        debug!(id = %id, quantity = quantity, "Conditional stock decrement");

        let sql = format!(
            "UPDATE products SET stock = stock - ?, updated_at = ?
             WHERE id = ? AND is_active = 1 AND stock >= ?
             RETURNING {}",
            PRODUCT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Product>(&sql)
            .bind(quantity)
            .bind(Utc::now())
            .bind(id)
            .bind(quantity)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(product) = updated {
            return Ok(product);
        }

        let current = Self::fetch_active_in(conn, id).await?;
        Err(CoreError::InsufficientStock {
            product_id: current.id,
            product_name: current.name,
            available: current.stock,
            requested: quantity,
        }
        .into())
    }

    /// Compare-and-set to an absolute level.
    ///
    /// `expected` is the stock the caller based its decision on; if the row
    /// moved since, nothing is written and the transaction should be retried
    /// by the caller.
    pub async fn set_stock_in(
        conn: &mut SqliteConnection,
        id: &str,
        expected: i64,
        new_stock: i64,
    ) -> DbResult<Product> {
        validate_stock_level(new_stock)?;

        let sql = format!(
            "UPDATE products SET stock = ?, updated_at = ?
             WHERE id = ? AND is_active = 1 AND stock = ?
             RETURNING {}",
            PRODUCT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Product>(&sql)
            .bind(new_stock)
            .bind(Utc::now())
            .bind(id)
            .bind(expected)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(product) = updated {
            return Ok(product);
        }

        let current = Self::fetch_active_in(conn, id).await?;
        Err(DbError::TransactionFailed(format!(
            "stock of {} changed from {} to {} during adjustment",
            current.id, expected, current.stock
        )))
    }

    /// Raises `purchase_price` to `candidate` only if it is higher.
    /// Returns whether the price changed.
    pub async fn raise_purchase_price_in(
        conn: &mut SqliteConnection,
        id: &str,
        candidate: Money,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE products SET purchase_price = ?, updated_at = ?
             WHERE id = ? AND is_active = 1 AND purchase_price < ?",
        )
        .bind(candidate)
        .bind(Utc::now())
        .bind(id)
        .bind(candidate)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Names the column of a unique violation on insert.
fn duplicate_field(err: sqlx::Error, code: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.contains("barcode") => {
            ValidationError::Duplicate {
                field: "barcode".to_string(),
                value: String::new(),
            }
            .into()
        }
        DbError::UniqueViolation { .. } => ValidationError::Duplicate {
            field: "code".to_string(),
            value: code.to_string(),
        }
        .into(),
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
