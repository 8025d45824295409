//! # Sale Repository
//!
//! Database operations for sales and sale items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── insert_sale_in() → Sale { is_draft: true | false }             │
//! │     └── insert_item_in() per line                                      │
//! │                                                                         │
//! │  2. (DRAFT ONLY) EDIT                                                  │
//! │     └── update_draft_totals_in() + delete_items_in() + insert_item_in()│
//! │                                                                         │
//! │  3. FINALIZE                                                           │
//! │     └── mark_finalized_in() → is_draft = 0                             │
//! │     └── set_item_cost_in() per line                                    │
//! │                                                                         │
//! │  4. (OPTIONAL) DELETE                                                  │
//! │     └── soft_delete() → is_active = 0, stock untouched                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Functions ending in `_in` run on the caller's transaction. The services
//! own the ordering of those calls together with the stock primitives.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use kasir_core::report::{DateWindow, SoldLine};
use kasir_core::sale::{SaleTotals, Settlement};
use kasir_core::{Money, PaymentMethod, Sale, SaleItem, SaleWithItems};

use crate::error::DbResult;

const SALE_COLUMNS: &str = "id, invoice_number, customer_name, cashier, notes, subtotal, \
     discount, tax, total, paid, change_amount, payment_method, is_draft, is_active, \
     created_at, updated_at, finalized_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, product_name, quantity, unit_price, \
     discount, total, unit_cost, created_at";

// =============================================================================
// Inputs
// =============================================================================

/// Free-text labels of a sale. Never affects stock.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SaleMeta {
    pub customer_name: Option<String>,
    pub cashier: Option<String>,
    pub notes: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

/// A sale header ready to insert.
#[derive(Debug, Clone)]
pub struct SaleRow<'a> {
    pub invoice_number: &'a str,
    pub meta: &'a SaleMeta,
    pub totals: SaleTotals,
    /// `None` for drafts.
    pub settlement: Option<Settlement>,
    pub created_at: DateTime<Utc>,
}

/// A priced line ready to insert, quantity already in base units.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
    pub total: Money,
    pub unit_cost: Option<Money>,
}

/// Filters for [`SaleRepository::list`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SaleFilter {
    pub window: Option<DateWindow>,
    #[serde(default)]
    pub include_drafts: bool,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<u32>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Transactional Writes
    // =========================================================================

    /// Inserts a sale header. A duplicate invoice number surfaces as
    /// `DbError::UniqueViolation` and leaves the transaction usable.
    pub async fn insert_sale_in(conn: &mut SqliteConnection, row: &SaleRow<'_>) -> DbResult<Sale> {
        let id = Uuid::new_v4().to_string();
        let is_draft = row.settlement.is_none();
        let settlement = row.settlement.unwrap_or(Settlement {
            paid: Money::zero(),
            change: Money::zero(),
            method: row.meta.payment_method.unwrap_or_default(),
        });
        let finalized_at = (!is_draft).then_some(row.created_at);

        debug!(id = %id, invoice_number = %row.invoice_number, is_draft, "Inserting sale");

        let sql = format!(
            "INSERT INTO sales (
                id, invoice_number, customer_name, cashier, notes,
                subtotal, discount, tax, total, paid, change_amount, payment_method,
                is_draft, is_active, created_at, updated_at, finalized_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING {}",
            SALE_COLUMNS
        );
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(&id)
            .bind(row.invoice_number)
            .bind(&row.meta.customer_name)
            .bind(&row.meta.cashier)
            .bind(&row.meta.notes)
            .bind(row.totals.subtotal)
            .bind(row.totals.discount)
            .bind(row.totals.tax)
            .bind(row.totals.total)
            .bind(settlement.paid)
            .bind(settlement.change)
            .bind(settlement.method)
            .bind(is_draft)
            .bind(row.created_at)
            .bind(row.created_at)
            .bind(finalized_at)
            .fetch_one(&mut *conn)
            .await?;

        Ok(sale)
    }

    /// Number of invoices already issued under `base`, used as the next
    /// disambiguation suffix after a collision. `base` is matched literally,
    /// so `_` or `%` in the configured prefix are not wildcards.
    pub async fn invoices_with_base_in(conn: &mut SqliteConnection, base: &str) -> DbResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sales
             WHERE invoice_number = ? OR invoice_number LIKE ? ESCAPE '\\'",
        )
        .bind(base)
        .bind(format!("{}-%", escape_like(base)))
        .fetch_one(&mut *conn)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    pub async fn insert_item_in(
        conn: &mut SqliteConnection,
        sale_id: &str,
        item: &ItemRow,
        created_at: DateTime<Utc>,
    ) -> DbResult<SaleItem> {
        let sql = format!(
            "INSERT INTO sale_items (
                id, sale_id, product_id, product_name, quantity,
                unit_price, discount, total, unit_cost, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}",
            ITEM_COLUMNS
        );
        let inserted = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(sale_id)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.total)
            .bind(item.unit_cost)
            .bind(created_at)
            .fetch_one(&mut *conn)
            .await?;

        Ok(inserted)
    }

    pub async fn delete_items_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sale_items WHERE sale_id = ?")
            .bind(sale_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }

    /// Flips an active draft to finalized. Returns `false` when the sale is
    /// no longer an active draft, in which case nothing was written.
    pub async fn mark_finalized_in(
        conn: &mut SqliteConnection,
        id: &str,
        settlement: &Settlement,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE sales SET
                is_draft = 0, paid = ?, change_amount = ?, payment_method = ?,
                finalized_at = ?, updated_at = ?
             WHERE id = ? AND is_draft = 1 AND is_active = 1",
        )
        .bind(settlement.paid)
        .bind(settlement.change)
        .bind(settlement.method)
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Rewrites the totals of an active draft. `false` if it is not one.
    pub async fn update_draft_totals_in(
        conn: &mut SqliteConnection,
        id: &str,
        totals: &SaleTotals,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE sales SET subtotal = ?, discount = ?, tax = ?, total = ?, updated_at = ?
             WHERE id = ? AND is_draft = 1 AND is_active = 1",
        )
        .bind(totals.subtotal)
        .bind(totals.discount)
        .bind(totals.tax)
        .bind(totals.total)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records the unit cost snapshot taken when the line's stock moved.
    pub async fn set_item_cost_in(
        conn: &mut SqliteConnection,
        item_id: &str,
        unit_cost: Money,
    ) -> DbResult<()> {
        sqlx::query("UPDATE sale_items SET unit_cost = ? WHERE id = ?")
            .bind(unit_cost)
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn items_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {} FROM sale_items WHERE sale_id = ? ORDER BY created_at, rowid",
            ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(items)
    }

    // =========================================================================
    // Plain Writes
    // =========================================================================

    /// Replaces the labels of an active sale, returning the updated row.
    /// `None` if the sale is missing or deleted.
    pub async fn update_meta(&self, id: &str, meta: &SaleMeta) -> DbResult<Option<Sale>> {
        debug!(id = %id, "Updating sale metadata");

        let sql = format!(
            "UPDATE sales SET
                customer_name = ?, cashier = ?, notes = ?,
                payment_method = COALESCE(?, payment_method), updated_at = ?
             WHERE id = ? AND is_active = 1
             RETURNING {}",
            SALE_COLUMNS
        );
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(&meta.customer_name)
            .bind(&meta.cashier)
            .bind(&meta.notes)
            .bind(meta.payment_method)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Flags an active sale as deleted. `false` if there was none.
    pub async fn soft_delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE sales SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a sale by ID, deleted or not.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    pub async fn get_by_invoice(&self, invoice_number: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE invoice_number = ?", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::items_in(&mut conn, sale_id).await
    }

    pub async fn get_with_items(&self, id: &str) -> DbResult<Option<SaleWithItems>> {
        let Some(sale) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let items = self.get_items(id).await?;

        Ok(Some(SaleWithItems { sale, items }))
    }

    /// Newest first. Finalized and active only unless the filter widens it.
    pub async fn list(&self, filter: &SaleFilter, limit: u32) -> DbResult<Vec<Sale>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM sales WHERE 1 = 1", SALE_COLUMNS));

        if !filter.include_drafts {
            builder.push(" AND is_draft = 0");
        }
        if !filter.include_deleted {
            builder.push(" AND is_active = 1");
        }
        if let Some(window) = filter.window {
            let (from, until) = window.bounds();
            builder.push(" AND created_at >= ").push_bind(from);
            builder.push(" AND created_at < ").push_bind(until);
        }
        builder
            .push(" ORDER BY created_at DESC, invoice_number DESC LIMIT ")
            .push_bind(i64::from(limit));

        let sales = builder.build_query_as::<Sale>().fetch_all(&self.pool).await?;

        Ok(sales)
    }

    /// Lines of finalized, active sales finalized inside `window`, with the
    /// product's current purchase price and the snapshot cost side by side.
    ///
    /// A draft counts on the day it was finalized, not the day it was opened.
    pub async fn sold_lines(&self, window: &DateWindow) -> DbResult<Vec<SoldLine>> {
        let (from, until) = window.bounds();

        let lines = sqlx::query_as::<_, SoldLine>(
            "SELECT
                si.product_id AS product_id,
                si.product_name AS product_name,
                si.quantity AS quantity,
                si.total AS revenue,
                COALESCE(p.purchase_price, 0) AS current_cost,
                si.unit_cost AS snapshot_cost
             FROM sale_items si
             JOIN sales s ON s.id = si.sale_id
             LEFT JOIN products p ON p.id = si.product_id
             WHERE s.is_draft = 0 AND s.is_active = 1
               AND COALESCE(s.finalized_at, s.created_at) >= ?
               AND COALESCE(s.finalized_at, s.created_at) < ?
             ORDER BY COALESCE(s.finalized_at, s.created_at), si.rowid",
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = lines.len(), "Loaded sold lines");
        Ok(lines)
    }

    /// Finalized, active sales finalized inside `window`.
    pub async fn count_finalized(&self, window: &DateWindow) -> DbResult<i64> {
        let (from, until) = window.bounds();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sales
             WHERE is_draft = 0 AND is_active = 1
               AND COALESCE(finalized_at, created_at) >= ?
               AND COALESCE(finalized_at, created_at) < ?",
        )
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Escapes `LIKE` wildcards with `\\`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::{memory_db, product};

    fn totals(total: i64) -> SaleTotals {
        SaleTotals::from_lines(Money::from_minor(total), Money::zero(), Money::zero())
    }

    fn paid(total: i64) -> Option<Settlement> {
        Some(Settlement {
            paid: Money::from_minor(total),
            change: Money::zero(),
            method: PaymentMethod::default(),
        })
    }

    #[tokio::test]
    async fn test_duplicate_invoice_is_reported_and_counted() {
        let db = memory_db().await;
        let meta = SaleMeta::default();
        let now = Utc::now();
        let base = "INV-20260101-090000";

        let mut tx = db.begin().await.unwrap();
        let first = SaleRow {
            invoice_number: base,
            meta: &meta,
            totals: totals(1500),
            settlement: paid(1500),
            created_at: now,
        };
        let sale = SaleRepository::insert_sale_in(&mut tx, &first).await.unwrap();
        assert!(!sale.is_draft);
        assert_eq!(sale.paid.minor(), 1500);

        let err = SaleRepository::insert_sale_in(&mut tx, &first)
            .await
            .unwrap_err();
        assert!(err.is_unique_on("invoice_number"));

        // The failed insert leaves the transaction usable.
        let suffixed = format!("{}-1", base);
        let draft = SaleRow {
            invoice_number: &suffixed,
            settlement: None,
            ..first
        };
        let draft = SaleRepository::insert_sale_in(&mut tx, &draft).await.unwrap();
        assert!(draft.is_draft);
        assert_eq!(draft.paid, Money::zero());

        let issued = SaleRepository::invoices_with_base_in(&mut tx, base)
            .await
            .unwrap();
        assert_eq!(issued, 2);
        tx.commit().await.unwrap();

        let found = db.sales().get_by_invoice(&suffixed).await.unwrap().unwrap();
        assert_eq!(found.id, draft.id);
    }

    #[tokio::test]
    async fn test_list_hides_drafts_and_deleted_by_default() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let meta = SaleMeta::default();
        let now = Utc::now();
        let repo = db.sales();

        let mut tx = db.begin().await.unwrap();
        let mut ids = Vec::new();
        for (invoice, settlement) in [("INV-A", paid(1500)), ("INV-B", None), ("INV-C", paid(1500))] {
            let row = SaleRow {
                invoice_number: invoice,
                meta: &meta,
                totals: totals(1500),
                settlement,
                created_at: now,
            };
            let sale = SaleRepository::insert_sale_in(&mut tx, &row).await.unwrap();
            let item = ItemRow {
                product_id: p.id.clone(),
                product_name: p.name.clone(),
                quantity: 1,
                unit_price: Money::from_minor(1500),
                discount: Money::zero(),
                total: Money::from_minor(1500),
                unit_cost: None,
            };
            SaleRepository::insert_item_in(&mut tx, &sale.id, &item, now)
                .await
                .unwrap();
            ids.push(sale.id);
        }
        tx.commit().await.unwrap();

        assert!(repo.soft_delete(&ids[2]).await.unwrap());
        assert!(!repo.soft_delete(&ids[2]).await.unwrap());

        let visible = repo.list(&SaleFilter::default(), 10).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].invoice_number, "INV-A");

        let everything = SaleFilter {
            include_drafts: true,
            include_deleted: true,
            ..SaleFilter::default()
        };
        assert_eq!(repo.list(&everything, 10).await.unwrap().len(), 3);

        let today = DateWindow::day(now.date_naive());
        let lines = repo.sold_lines(&today).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].current_cost.minor(), 1000);
        assert_eq!(lines[0].snapshot_cost, None);
        assert_eq!(repo.count_finalized(&today).await.unwrap(), 1);

        // Labels of a deleted sale stay as they are.
        let renamed = SaleMeta {
            customer_name: Some("Budi".to_string()),
            ..SaleMeta::default()
        };
        assert!(repo.update_meta(&ids[2], &renamed).await.unwrap().is_none());
        let updated = repo.update_meta(&ids[0], &renamed).await.unwrap().unwrap();
        assert_eq!(updated.customer_name.as_deref(), Some("Budi"));
    }

    #[tokio::test]
    async fn test_draft_counts_on_the_day_it_was_finalized() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let meta = SaleMeta::default();
        let now = Utc::now();
        let opened = now - chrono::Duration::days(1);
        let repo = db.sales();

        let mut tx = db.begin().await.unwrap();
        let row = SaleRow {
            invoice_number: "INV-DRAFT",
            meta: &meta,
            totals: totals(1500),
            settlement: None,
            created_at: opened,
        };
        let draft = SaleRepository::insert_sale_in(&mut tx, &row).await.unwrap();
        let item = ItemRow {
            product_id: p.id.clone(),
            product_name: p.name.clone(),
            quantity: 1,
            unit_price: Money::from_minor(1500),
            discount: Money::zero(),
            total: Money::from_minor(1500),
            unit_cost: Some(Money::from_minor(1000)),
        };
        SaleRepository::insert_item_in(&mut tx, &draft.id, &item, opened)
            .await
            .unwrap();
        let settlement = paid(1500).unwrap();
        assert!(SaleRepository::mark_finalized_in(&mut tx, &draft.id, &settlement, now)
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let today = DateWindow::day(now.date_naive());
        let yesterday = DateWindow::day(opened.date_naive());

        let lines = repo.sold_lines(&today).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].snapshot_cost, Some(Money::from_minor(1000)));
        assert_eq!(repo.count_finalized(&today).await.unwrap(), 1);

        assert!(repo.sold_lines(&yesterday).await.unwrap().is_empty());
        assert_eq!(repo.count_finalized(&yesterday).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invoice_base_matches_prefix_literally() {
        let db = memory_db().await;
        let meta = SaleMeta::default();
        let now = Utc::now();
        let base = "IN_V-20260101-090000";

        let mut tx = db.begin().await.unwrap();
        for invoice in [base, "INXV-20260101-090000-01", "IN_V-20260101-0900001"] {
            let row = SaleRow {
                invoice_number: invoice,
                meta: &meta,
                totals: totals(1500),
                settlement: paid(1500),
                created_at: now,
            };
            SaleRepository::insert_sale_in(&mut tx, &row).await.unwrap();
        }

        assert_eq!(SaleRepository::invoices_with_base_in(&mut tx, base).await.unwrap(), 1);
        assert_eq!(
            SaleRepository::invoices_with_base_in(&mut tx, "IN%V-20260101-090000")
                .await
                .unwrap(),
            0
        );
        tx.commit().await.unwrap();
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("INV-20260101"), "INV-20260101");
        assert_eq!(escape_like("A_B%C\\D"), "A\\_B\\%C\\\\D");
    }
}
