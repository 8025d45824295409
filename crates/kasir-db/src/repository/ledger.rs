//! # Stock Movement Repository
//!
//! Database operations for the append-only stock ledger.
//!
//! ## Append Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 One logical operation, two tables                       │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    UPDATE products SET stock = stock - 3 ... RETURNING stock   (7)      │
//! │    INSERT INTO stock_movements (before=10, after=7, type='out')         │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  `append_in` only accepts a connection, so there is no way to append   │
//! │  outside the caller's transaction. There is no update or delete:       │
//! │  corrections are compensating entries, and triggers reject UPDATE and  │
//! │  DELETE on the table.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use kasir_core::ledger::NewStockMovement;
use kasir_core::report::DateWindow;
use kasir_core::{MovementType, ReferenceType, StockMovement};

use crate::error::DbResult;

const MOVEMENT_COLUMNS: &str = "sequence, id, product_id, product_name, movement_type, quantity, \
     quantity_before, quantity_after, unit_cost, total_cost, reference_type, reference_id, \
     notes, created_by, created_at";

/// Filters for [`StockMovementRepository::query`]. All optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LedgerFilter {
    pub product_id: Option<String>,
    pub movement_type: Option<MovementType>,
    pub window: Option<DateWindow>,
    pub limit: Option<u32>,
}

impl LedgerFilter {
    pub fn for_product(product_id: impl Into<String>) -> Self {
        LedgerFilter {
            product_id: Some(product_id.into()),
            ..Default::default()
        }
    }

    pub fn movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_type = Some(movement_type);
        self
    }

    pub fn window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Repository for the stock ledger.
#[derive(Debug, Clone)]
pub struct StockMovementRepository {
    pool: SqlitePool,
}

impl StockMovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockMovementRepository { pool }
    }

    /// Validates and appends one entry on the caller's connection.
    ///
    /// ## Errors
    /// - `CoreError::LedgerInvariant` when the endpoints disagree with the
    ///   movement type; nothing is inserted
    pub async fn append_in(
        conn: &mut SqliteConnection,
        entry: &NewStockMovement,
    ) -> DbResult<StockMovement> {
        entry.validate()?;
        let total_cost = entry.total_cost()?;

        let (reference_type, reference_id) = entry.reference.clone().into_parts();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(
            product_id = %entry.product_id,
            movement_type = %entry.movement_type,
            before = entry.quantity_before,
            after = entry.quantity_after,
            "Appending stock movement"
        );

        let sql = format!(
            "INSERT INTO stock_movements (
                id, product_id, product_name, movement_type, quantity,
                quantity_before, quantity_after, unit_cost, total_cost,
                reference_type, reference_id, notes, created_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}",
            MOVEMENT_COLUMNS
        );

        let movement = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(&id)
            .bind(&entry.product_id)
            .bind(&entry.product_name)
            .bind(entry.movement_type)
            .bind(entry.quantity)
            .bind(entry.quantity_before)
            .bind(entry.quantity_after)
            .bind(entry.unit_cost)
            .bind(total_cost)
            .bind(reference_type)
            .bind(reference_id)
            .bind(&entry.notes)
            .bind(&entry.created_by)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?;

        Ok(movement)
    }

    /// Most recent first, newest sequence on top.
    pub async fn query(&self, filter: &LedgerFilter, limit: u32) -> DbResult<Vec<StockMovement>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM stock_movements WHERE 1 = 1",
            MOVEMENT_COLUMNS
        ));

        if let Some(product_id) = &filter.product_id {
            builder.push(" AND product_id = ").push_bind(product_id.clone());
        }
        if let Some(movement_type) = filter.movement_type {
            builder.push(" AND movement_type = ").push_bind(movement_type);
        }
        if let Some(window) = filter.window {
            let (from, until) = window.bounds();
            builder.push(" AND created_at >= ").push_bind(from);
            builder.push(" AND created_at < ").push_bind(until);
        }
        builder.push(" ORDER BY sequence DESC LIMIT ").push_bind(limit as i64);

        let movements = builder
            .build_query_as::<StockMovement>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = movements.len(), "Ledger query returned movements");
        Ok(movements)
    }

    /// Full history of one product in insertion order.
    pub async fn history(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE product_id = ? ORDER BY sequence ASC",
            MOVEMENT_COLUMNS
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Entries caused by one record (a sale, a receipt).
    pub async fn for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements
             WHERE reference_type = ? AND reference_id = ?
             ORDER BY sequence ASC",
            MOVEMENT_COLUMNS
        );

        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(reference_type)
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(movements)
    }

    /// Counts entries, optionally for one product.
    pub async fn count(&self, product_id: Option<&str>) -> DbResult<i64> {
        let count: i64 = match product_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count)
    }
}
