//! # Sale Transaction Manager
//!
//! Creates, finalizes, edits and deletes sales. The stock effects of a sale
//! (conditional decrement + `out` ledger entry per line) are applied in the
//! same transaction that writes the sale rows.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. cheap checks       item count, quantities, prices, total > 0        │
//! │  2. price lines        load products, convert units, line totals        │
//! │  3. stock pre-check    aggregated per product, fails fast               │
//! │  4. reconcile totals   caller's header vs line sum                      │
//! │  5. BEGIN                                                               │
//! │       INSERT sale (retry invoice suffix on collision)                   │
//! │       per line (finalized only):                                        │
//! │         UPDATE products SET stock = stock - q WHERE stock >= q          │
//! │         INSERT stock_movements (out, reference sale)                    │
//! │       INSERT sale_items                                                 │
//! │     COMMIT                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pre-check in step 3 reads stock outside the transaction and may be
//! stale; the conditional decrement is what actually guards stock.
//!
//! Drafts never touch stock. Their effects are applied by
//! [`SaleService::finalize_sale`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use kasir_core::ledger::NewStockMovement;
use kasir_core::sale::{invoice_number, line_total, settle, SaleTotals, Settlement, Tender};
use kasir_core::validation::{
    normalize_optional, validate_item_count, validate_non_negative, validate_quantity,
};
use kasir_core::{
    CoreError, Money, MovementReference, MovementType, Product, Sale, SaleState, SaleWithItems,
    ValidationError, MAX_MONEY_MINOR,
};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::ledger::StockMovementRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::{ItemRow, SaleFilter, SaleMeta, SaleRepository, SaleRow};

// =============================================================================
// Requests
// =============================================================================

/// One requested line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaleItemInput {
    pub product_id: String,
    /// Quantity in `unit`.
    pub quantity: i64,
    /// Base unit when absent. The product's alternate unit is converted
    /// with its factor.
    pub unit: Option<String>,
    /// Price per base unit. Defaults to the product's selling price.
    pub unit_price: Option<Money>,
    #[serde(default)]
    pub discount: Money,
}

impl SaleItemInput {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        SaleItemInput {
            product_id: product_id.into(),
            quantity,
            unit: None,
            unit_price: None,
            discount: Money::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateSaleRequest {
    pub items: Vec<SaleItemInput>,
    /// Header figures. Derived from the lines (no discount, no tax) if absent.
    pub totals: Option<SaleTotals>,
    #[serde(default)]
    pub meta: SaleMeta,
    #[serde(default)]
    pub is_draft: bool,
    /// Payment for a finalized sale. Exact payment if absent.
    pub tender: Option<Tender>,
}

impl CreateSaleRequest {
    /// A finalized sale of `items` at catalog prices, paid exactly.
    pub fn finalized(items: Vec<SaleItemInput>) -> Self {
        CreateSaleRequest {
            items,
            totals: None,
            meta: SaleMeta::default(),
            is_draft: false,
            tender: None,
        }
    }

    pub fn draft(items: Vec<SaleItemInput>) -> Self {
        CreateSaleRequest {
            is_draft: true,
            ..Self::finalized(items)
        }
    }
}

/// Lines priced against the catalog, not yet persisted.
struct PricedLines {
    rows: Vec<ItemRow>,
    lines_sum: Money,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone)]
pub struct SaleService {
    db: Database,
}

impl SaleService {
    pub fn new(db: Database) -> Self {
        SaleService { db }
    }

    /// Creates a draft or finalized sale atomically.
    ///
    /// ## Errors
    /// - `ValidationError` for empty items, bad quantities, totals that do
    ///   not reconcile, or a finalized sale paid short
    /// - `ProductNotFound` for a missing or inactive product
    /// - `InsufficientStock` naming the product and its shortfall
    /// - `TransactionFailed` when invoice numbers keep colliding
    pub async fn create_sale(&self, request: CreateSaleRequest) -> DbResult<SaleWithItems> {
        debug!(
            items = request.items.len(),
            is_draft = request.is_draft,
            "create_sale"
        );

        if let Some(totals) = &request.totals {
            if !totals.total.is_positive() {
                return Err(ValidationError::MustBePositive {
                    field: "total".to_string(),
                }
                .into());
            }
        }

        let meta = normalize_meta(&request.meta)?;
        let (priced, products) = self.price_lines(&request.items).await?;
        precheck_stock(&priced.rows, &products)?;

        let totals = request
            .totals
            .unwrap_or_else(|| SaleTotals::from_lines(priced.lines_sum, Money::zero(), Money::zero()));
        totals.reconcile(priced.lines_sum, self.db.settings().totals_tolerance)?;

        let settlement = if request.is_draft {
            None
        } else {
            Some(settle(
                totals.total,
                request.tender,
                meta.payment_method.unwrap_or_default(),
            )?)
        };

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let sale = self
            .insert_with_invoice(&mut tx, &meta, totals, settlement, now)
            .await?;

        let mut items = Vec::with_capacity(priced.rows.len());
        for row in &priced.rows {
            let item = if settlement.is_some() {
                let unit_cost = apply_line_in(
                    &mut tx,
                    &sale.id,
                    &row.product_id,
                    row.quantity,
                    meta.cashier.clone(),
                )
                .await
                .inspect_err(|e| log_rejection(&sale.invoice_number, e))?;
                let costed = ItemRow {
                    unit_cost: Some(unit_cost),
                    ..row.clone()
                };
                SaleRepository::insert_item_in(&mut tx, &sale.id, &costed, now).await?
            } else {
                SaleRepository::insert_item_in(&mut tx, &sale.id, row, now).await?
            };
            items.push(item);
        }

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            invoice_number = %sale.invoice_number,
            total = %sale.total,
            items = items.len(),
            is_draft = sale.is_draft,
            "Sale created"
        );

        Ok(SaleWithItems { sale, items })
    }

    /// Applies a draft's stock effects and marks it finalized.
    ///
    /// Each line is decremented against current stock and its unit cost is
    /// snapshotted. Any shortfall rolls the whole finalize back; the sale
    /// stays a draft.
    pub async fn finalize_sale(&self, id: &str, tender: Option<Tender>) -> DbResult<SaleWithItems> {
        debug!(id = %id, "finalize_sale");

        let sale = self.active_sale(id).await?;
        if !sale.is_draft {
            return Err(CoreError::AlreadyFinalized {
                invoice_number: sale.invoice_number,
            }
            .into());
        }
        let settlement = settle(sale.total, tender, sale.payment_method)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !SaleRepository::mark_finalized_in(&mut tx, id, &settlement, now).await? {
            drop(tx);
            return Err(self.state_error(id, "finalize").await);
        }

        let items = SaleRepository::items_in(&mut tx, id).await?;
        for item in &items {
            let unit_cost = apply_line_in(
                &mut tx,
                id,
                &item.product_id,
                item.quantity,
                sale.cashier.clone(),
            )
            .await
            .inspect_err(|e| log_rejection(&sale.invoice_number, e))?;
            SaleRepository::set_item_cost_in(&mut tx, &item.id, unit_cost).await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %id,
            invoice_number = %sale.invoice_number,
            items = items.len(),
            paid = %settlement.paid,
            "Sale finalized"
        );

        self.get_sale(id).await
    }

    /// Replaces the labels of a draft or finalized sale. Stock is untouched.
    pub async fn update_sale(&self, id: &str, meta: SaleMeta) -> DbResult<Sale> {
        let meta = normalize_meta(&meta)?;

        match self.db.sales().update_meta(id, &meta).await? {
            Some(sale) => {
                info!(sale_id = %id, "Sale updated");
                Ok(sale)
            }
            None => Err(self.state_error(id, "update").await),
        }
    }

    /// Rewrites a draft's whole item set and totals in one transaction.
    ///
    /// Rejected with `InvalidSaleState` once the sale is finalized, since
    /// its stock has already moved.
    pub async fn replace_draft_items(
        &self,
        id: &str,
        items: Vec<SaleItemInput>,
        totals: Option<SaleTotals>,
    ) -> DbResult<SaleWithItems> {
        debug!(id = %id, items = items.len(), "replace_draft_items");

        let (priced, _) = self.price_lines(&items).await?;
        let totals = totals
            .unwrap_or_else(|| SaleTotals::from_lines(priced.lines_sum, Money::zero(), Money::zero()));
        totals.reconcile(priced.lines_sum, self.db.settings().totals_tolerance)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !SaleRepository::update_draft_totals_in(&mut tx, id, &totals, now).await? {
            drop(tx);
            return Err(self.state_error(id, "replace items").await);
        }

        SaleRepository::delete_items_in(&mut tx, id).await?;
        for row in &priced.rows {
            SaleRepository::insert_item_in(&mut tx, id, row, now).await?;
        }

        tx.commit().await?;

        info!(sale_id = %id, items = priced.rows.len(), total = %totals.total, "Draft items replaced");
        self.get_sale(id).await
    }

    /// Soft-deletes a sale. Stock and ledger are left as they are; reversing
    /// stock is a separate, deliberate adjustment.
    pub async fn delete_sale(&self, id: &str) -> DbResult<()> {
        if !self.db.sales().soft_delete(id).await? {
            return Err(CoreError::SaleNotFound(id.to_string()).into());
        }

        info!(sale_id = %id, "Sale deleted");
        Ok(())
    }

    /// A sale with its items, deleted ones included.
    pub async fn get_sale(&self, id: &str) -> DbResult<SaleWithItems> {
        self.db
            .sales()
            .get_with_items(id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(id.to_string()).into())
    }

    pub async fn list_sales(&self, filter: &SaleFilter) -> DbResult<Vec<Sale>> {
        let settings = self.db.settings();
        let limit = filter
            .limit
            .unwrap_or(settings.default_query_limit)
            .clamp(1, settings.max_query_limit);

        self.db.sales().list(filter, limit).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn active_sale(&self, id: &str) -> DbResult<Sale> {
        match self.db.sales().get_by_id(id).await? {
            Some(sale) if sale.is_active => Ok(sale),
            _ => Err(CoreError::SaleNotFound(id.to_string()).into()),
        }
    }

    /// Explains why a guarded sale update touched no row.
    async fn state_error(&self, id: &str, operation: &str) -> DbError {
        let sale = match self.db.sales().get_by_id(id).await {
            Ok(Some(sale)) => sale,
            Ok(None) => return CoreError::SaleNotFound(id.to_string()).into(),
            Err(e) => return e,
        };

        let err = match sale.state() {
            SaleState::Deleted => CoreError::SaleNotFound(id.to_string()),
            SaleState::Finalized if operation == "finalize" => CoreError::AlreadyFinalized {
                invoice_number: sale.invoice_number,
            },
            state => CoreError::InvalidSaleState {
                invoice_number: sale.invoice_number,
                state: state.to_string(),
                operation: operation.to_string(),
            },
        };
        warn!(sale_id = %id, operation, error = %err, "Sale operation rejected");
        err.into()
    }

    /// Validates lines and prices them against the active catalog.
    ///
    /// Cheap per-item checks run over all lines before any product is
    /// loaded.
    async fn price_lines(
        &self,
        items: &[SaleItemInput],
    ) -> DbResult<(PricedLines, HashMap<String, Product>)> {
        validate_item_count(items.len())?;
        for item in items {
            validate_quantity(item.quantity)?;
            if let Some(price) = item.unit_price {
                validate_non_negative("unit_price", price)?;
            }
            validate_non_negative("item discount", item.discount)?;
        }

        let repo = self.db.products();
        let mut products: HashMap<String, Product> = HashMap::new();
        let mut rows = Vec::with_capacity(items.len());
        let mut lines_sum = Money::zero();

        for item in items {
            if !products.contains_key(&item.product_id) {
                let product = repo.get_active(&item.product_id).await?;
                products.insert(item.product_id.clone(), product);
            }
            let product = products
                .get(&item.product_id)
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

            let quantity = product.to_base_quantity(item.quantity, item.unit.as_deref())?;
            validate_quantity(quantity)?;
            let unit_price = item.unit_price.unwrap_or(product.selling_price);
            let total = line_total(quantity, unit_price, item.discount)?;

            lines_sum = lines_sum
                .checked_add(total)
                .ok_or_else(|| ValidationError::OutOfRange {
                    field: "subtotal".to_string(),
                    min: 0,
                    max: MAX_MONEY_MINOR,
                })?;
            rows.push(ItemRow {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                quantity,
                unit_price,
                discount: item.discount,
                total,
                unit_cost: None,
            });
        }

        Ok((PricedLines { rows, lines_sum }, products))
    }

    /// Inserts the header, regenerating the invoice suffix on collision.
    async fn insert_with_invoice(
        &self,
        conn: &mut SqliteConnection,
        meta: &SaleMeta,
        totals: SaleTotals,
        settlement: Option<Settlement>,
        at: DateTime<Utc>,
    ) -> DbResult<Sale> {
        let settings = self.db.settings();
        let base = invoice_number(&settings.invoice_prefix, at, 0);
        let mut suffix = 0;
        let mut collisions = 0;

        loop {
            let number = invoice_number(&settings.invoice_prefix, at, suffix);
            let row = SaleRow {
                invoice_number: &number,
                meta,
                totals,
                settlement,
                created_at: at,
            };

            match SaleRepository::insert_sale_in(conn, &row).await {
                Ok(sale) => return Ok(sale),
                Err(e) if e.is_unique_on("invoice_number") => {
                    collisions += 1;
                    if collisions > settings.invoice_retries {
                        warn!(invoice_number = %number, collisions, "Invoice numbers exhausted");
                        return Err(DbError::TransactionFailed(format!(
                            "could not allocate an invoice number after {} attempts",
                            collisions
                        )));
                    }
                    let issued = SaleRepository::invoices_with_base_in(conn, &base).await?;
                    suffix = issued.max(suffix + 1);
                    debug!(invoice_number = %number, next_suffix = suffix, "Invoice number taken");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decrements stock for one line and appends its `out` entry. Returns the
/// unit cost snapshot (purchase price at the moment of sale).
async fn apply_line_in(
    conn: &mut SqliteConnection,
    sale_id: &str,
    product_id: &str,
    quantity: i64,
    cashier: Option<String>,
) -> DbResult<Money> {
    let product = ProductRepository::try_decrement_in(conn, product_id, quantity).await?;

    let entry = NewStockMovement::for_delta(
        &product.id,
        &product.name,
        MovementType::Out,
        product.stock + quantity,
        -quantity,
    )
    .with_unit_cost(product.purchase_price)
    .with_reference(MovementReference::Sale {
        sale_id: sale_id.to_string(),
    })
    .with_created_by(cashier);
    StockMovementRepository::append_in(conn, &entry).await?;

    Ok(product.purchase_price)
}

/// Fails fast when the summed demand per product exceeds the stock seen
/// while pricing.
fn precheck_stock(rows: &[ItemRow], products: &HashMap<String, Product>) -> DbResult<()> {
    let mut demand: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        *demand.entry(row.product_id.as_str()).or_insert(0) += row.quantity;
    }

    for (product_id, requested) in demand {
        let Some(product) = products.get(product_id) else {
            return Err(CoreError::ProductNotFound(product_id.to_string()).into());
        };
        if !product.can_sell(requested) {
            let err = CoreError::InsufficientStock {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                available: product.stock,
                requested,
            };
            warn!(product_id = %product.id, shortfall = ?err.shortfall(), "Sale rejected");
            return Err(err.into());
        }
    }

    Ok(())
}

fn normalize_meta(meta: &SaleMeta) -> Result<SaleMeta, ValidationError> {
    Ok(SaleMeta {
        customer_name: normalize_optional("customer_name", meta.customer_name.as_deref(), 100)?,
        cashier: normalize_optional("cashier", meta.cashier.as_deref(), 50)?,
        notes: normalize_optional("notes", meta.notes.as_deref(), 500)?,
        payment_method: meta.payment_method,
    })
}

fn log_rejection(invoice_number: &str, err: &DbError) {
    if let Some(domain) = err.as_domain() {
        warn!(invoice_number = %invoice_number, error = %domain, "Sale rolled back");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DbConfig, LedgerSettings};
    use crate::repository::ledger::LedgerFilter;
    use crate::service::fixtures::{memory_db, product};
    use kasir_core::report::DateWindow;
    use kasir_core::{PaymentMethod, ReferenceType};

    #[tokio::test]
    async fn test_finalized_sale_moves_stock_and_ledger() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;

        let request = CreateSaleRequest {
            totals: Some(SaleTotals::from_lines(
                Money::from_minor(4500),
                Money::zero(),
                Money::zero(),
            )),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 3)])
        };
        let created = db.sale_service().create_sale(request).await.unwrap();

        assert!(!created.sale.is_draft);
        assert_eq!(created.sale.total.minor(), 4500);
        assert_eq!(created.sale.paid.minor(), 4500);
        assert_eq!(created.items.len(), 1);
        assert_eq!(created.items[0].unit_cost, Some(Money::from_minor(1000)));

        let stock = db.products().get_active(&p.id).await.unwrap().stock;
        assert_eq!(stock, 7);

        let entries = db
            .ledger()
            .for_reference(ReferenceType::Sale, &created.sale.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].movement_type, MovementType::Out);
        assert_eq!(entries[0].quantity, 3);
        assert_eq!(entries[0].quantity_before, 10);
        assert_eq!(entries[0].quantity_after, 7);
    }

    #[tokio::test]
    async fn test_failed_item_rolls_back_everything() {
        let db = memory_db().await;
        let a = product(&db, "A", 10, 1000, 1500).await;
        let b = product(&db, "B", 1, 1000, 1500).await;
        let c = product(&db, "C", 10, 1000, 1500).await;

        let request = CreateSaleRequest::finalized(vec![
            SaleItemInput::new(&a.id, 2),
            SaleItemInput::new(&b.id, 5),
            SaleItemInput::new(&c.id, 2),
        ]);
        let err = db.sale_service().create_sale(request).await.unwrap_err();

        match err.as_domain() {
            Some(CoreError::InsufficientStock { product_id, .. }) => assert_eq!(product_id, &b.id),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.as_domain().and_then(CoreError::shortfall), Some(4));

        let sales: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_items")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let outs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE movement_type = 'out'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!((sales, items, outs), (0, 0, 0));

        assert_eq!(db.products().get_active(&a.id).await.unwrap().stock, 10);
        assert_eq!(db.products().get_active(&c.id).await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_demand_summed_per_product() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 5, 1000, 1500).await;

        // Same product on two lines: each fits alone, together they do not.
        let request = CreateSaleRequest::finalized(vec![
            SaleItemInput::new(&p.id, 3),
            SaleItemInput::new(&p.id, 3),
        ]);
        let err = db.sale_service().create_sale(request).await.unwrap_err();

        assert_eq!(err.code(), crate::error::ErrorCode::InsufficientStock);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_validation_before_stock() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 0, 1000, 1500).await;
        let service = db.sale_service();

        let empty = service
            .create_sale(CreateSaleRequest::finalized(vec![]))
            .await
            .unwrap_err();
        assert_eq!(empty.code(), crate::error::ErrorCode::ValidationError);

        // Zero quantity is a validation error even though stock is also 0.
        let zero = service
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 0)]))
            .await
            .unwrap_err();
        assert_eq!(zero.code(), crate::error::ErrorCode::ValidationError);

        let free = CreateSaleRequest {
            totals: Some(SaleTotals::default()),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)])
        };
        let err = service.create_sale(free).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_totals_must_reconcile() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;

        let request = CreateSaleRequest {
            totals: Some(SaleTotals::from_lines(
                Money::from_minor(4000),
                Money::zero(),
                Money::zero(),
            )),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 3)])
        };
        let err = db.sale_service().create_sale(request).await.unwrap_err();

        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::Inconsistent { .. }))
        ));
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_oversized_amounts_rejected_without_writes() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let service = db.sale_service();

        let overpriced = SaleItemInput {
            unit_price: Some(Money::from_minor(i64::MAX / 2)),
            ..SaleItemInput::new(&p.id, 3)
        };
        let err = service
            .create_sale(CreateSaleRequest::finalized(vec![overpriced]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));

        let inflated = CreateSaleRequest {
            totals: Some(SaleTotals {
                subtotal: Money::from_minor(i64::MAX),
                discount: Money::zero(),
                tax: Money::from_minor(10),
                total: Money::from_minor(1),
            }),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)])
        };
        let err = service.create_sale(inflated).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);

        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 10);
        assert_eq!(db.ledger().count(Some(&p.id)).await.unwrap(), 1);
        assert!(db
            .sales()
            .list(&all_sales(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_tender_and_change() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;

        let request = CreateSaleRequest {
            tender: Some(Tender {
                paid: Money::from_minor(5000),
                method: PaymentMethod::Cash,
            }),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 3)])
        };
        let created = db.sale_service().create_sale(request).await.unwrap();
        assert_eq!(created.sale.change_amount.minor(), 500);

        let short = CreateSaleRequest {
            tender: Some(Tender {
                paid: Money::from_minor(1000),
                method: PaymentMethod::Cash,
            }),
            ..CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)])
        };
        let err = db.sale_service().create_sale(short).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 7);
    }

    #[tokio::test]
    async fn test_draft_then_finalize() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let service = db.sale_service();

        let draft = service
            .create_sale(CreateSaleRequest::draft(vec![SaleItemInput::new(&p.id, 4)]))
            .await
            .unwrap();
        assert!(draft.sale.is_draft);
        assert_eq!(draft.sale.paid, Money::zero());
        assert_eq!(draft.items[0].unit_cost, None);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 10);

        let finalized = service.finalize_sale(&draft.sale.id, None).await.unwrap();
        assert!(!finalized.sale.is_draft);
        assert!(finalized.sale.finalized_at.is_some());
        assert_eq!(finalized.sale.paid.minor(), 6000);
        assert_eq!(finalized.items[0].unit_cost, Some(Money::from_minor(1000)));
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 6);

        let again = service.finalize_sale(&draft.sale.id, None).await.unwrap_err();
        assert!(matches!(
            again.as_domain(),
            Some(CoreError::AlreadyFinalized { .. })
        ));
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 6);
    }

    #[tokio::test]
    async fn test_finalize_shortfall_keeps_draft() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 5, 1000, 1500).await;
        let service = db.sale_service();

        let draft = service
            .create_sale(CreateSaleRequest::draft(vec![SaleItemInput::new(&p.id, 4)]))
            .await
            .unwrap();
        service
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 3)]))
            .await
            .unwrap();

        let err = service.finalize_sale(&draft.sale.id, None).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InsufficientStock);

        let reloaded = service.get_sale(&draft.sale.id).await.unwrap();
        assert!(reloaded.sale.is_draft);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 2);
    }

    #[tokio::test]
    async fn test_replace_items_only_on_drafts() {
        let db = memory_db().await;
        let a = product(&db, "A", 10, 1000, 1500).await;
        let b = product(&db, "B", 10, 2000, 2500).await;
        let service = db.sale_service();

        let draft = service
            .create_sale(CreateSaleRequest::draft(vec![SaleItemInput::new(&a.id, 1)]))
            .await
            .unwrap();

        let replaced = service
            .replace_draft_items(
                &draft.sale.id,
                vec![SaleItemInput::new(&a.id, 2), SaleItemInput::new(&b.id, 1)],
                None,
            )
            .await
            .unwrap();
        assert_eq!(replaced.items.len(), 2);
        assert_eq!(replaced.sale.total.minor(), 5500);

        service.finalize_sale(&draft.sale.id, None).await.unwrap();

        let err = service
            .replace_draft_items(&draft.sale.id, vec![SaleItemInput::new(&a.id, 1)], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::InvalidSaleState { .. })
        ));
        assert_eq!(service.get_sale(&draft.sale.id).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let service = db.sale_service();

        let sale = service
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 2)]))
            .await
            .unwrap()
            .sale;

        let updated = service
            .update_sale(
                &sale.id,
                SaleMeta {
                    customer_name: Some("  Bu Sri ".to_string()),
                    notes: Some("antar sore".to_string()),
                    ..SaleMeta::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.customer_name.as_deref(), Some("Bu Sri"));
        assert_eq!(updated.total, sale.total);

        service.delete_sale(&sale.id).await.unwrap();
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 8);
        assert_eq!(
            service.get_sale(&sale.id).await.unwrap().sale.state(),
            SaleState::Deleted
        );

        let twice = service.delete_sale(&sale.id).await.unwrap_err();
        assert_eq!(twice.code(), crate::error::ErrorCode::NotFound);

        let edit_deleted = service.update_sale(&sale.id, SaleMeta::default()).await.unwrap_err();
        assert_eq!(edit_deleted.code(), crate::error::ErrorCode::NotFound);

        let today = Utc::now().date_naive();
        let filter = SaleFilter {
            window: Some(DateWindow::new(today.pred_opt().unwrap(), today.succ_opt().unwrap()).unwrap()),
            ..SaleFilter::default()
        };
        assert!(service.list_sales(&filter).await.unwrap().is_empty());
        let with_deleted = SaleFilter {
            include_deleted: true,
            ..filter
        };
        assert_eq!(service.list_sales(&with_deleted).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invoice_numbers_unique_within_one_second() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 50, 1000, 1500).await;
        let service = db.sale_service();

        let mut numbers = Vec::new();
        for _ in 0..6 {
            let created = service
                .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)]))
                .await
                .unwrap();
            numbers.push(created.sale.invoice_number);
        }

        let mut unique = numbers.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), numbers.len());
        assert!(numbers.iter().all(|n| n.starts_with("INV-")));
    }

    fn all_sales() -> SaleFilter {
        SaleFilter {
            include_drafts: true,
            include_deleted: true,
            ..SaleFilter::default()
        }
    }

    /// Issues draft invoices for the next `seconds` seconds so that sales
    /// created meanwhile always collide on their base number.
    async fn occupy_invoice_bases(db: &Database, seconds: i64) -> usize {
        let meta = SaleMeta::default();
        let start = Utc::now();
        let totals = SaleTotals::from_lines(Money::from_minor(1500), Money::zero(), Money::zero());

        let mut tx = db.begin().await.unwrap();
        for offset in 0..seconds {
            let at = start + chrono::Duration::seconds(offset);
            let number = invoice_number(&db.settings().invoice_prefix, at, 0);
            let row = SaleRow {
                invoice_number: &number,
                meta: &meta,
                totals,
                settlement: None,
                created_at: start,
            };
            SaleRepository::insert_sale_in(&mut tx, &row).await.unwrap();
        }
        tx.commit().await.unwrap();

        seconds as usize
    }

    #[tokio::test]
    async fn test_invoice_collision_takes_next_suffix() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        occupy_invoice_bases(&db, 5).await;
        let service = db.sale_service();

        let first = service
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)]))
            .await
            .unwrap()
            .sale;
        assert_eq!(first.invoice_number, invoice_number("INV", first.created_at, 1));
        assert!(first.invoice_number.ends_with("-01"));

        let second = service
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 1)]))
            .await
            .unwrap()
            .sale;
        let expected_suffix = if second.created_at.timestamp() == first.created_at.timestamp() {
            2
        } else {
            1
        };
        assert_eq!(
            second.invoice_number,
            invoice_number("INV", second.created_at, expected_suffix)
        );
    }

    #[tokio::test]
    async fn test_invoice_retries_exhausted_persists_nothing() {
        let settings = LedgerSettings {
            invoice_retries: 0,
            ..LedgerSettings::default()
        };
        let db = Database::new(DbConfig::in_memory().ledger(settings))
            .await
            .unwrap();
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let occupied = occupy_invoice_bases(&db, 5).await;

        let err = db
            .sale_service()
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 2)]))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::TransactionFailed(_)));
        assert_eq!(err.code(), crate::error::ErrorCode::DatabaseError);
        assert_eq!(err.code().http_status(), 500);

        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 10);
        assert_eq!(db.ledger().count(Some(&p.id)).await.unwrap(), 1);
        assert_eq!(db.sales().list(&all_sales(), 100).await.unwrap().len(), occupied);
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_items")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(items, 0);
    }

    #[tokio::test]
    async fn test_fractional_quantities_through_sub_unit_base() {
        let db = memory_db().await;
        let p = product(&db, "BR-1", 5000, 12, 15).await;
        // Rice kept in grams, sold by the gram or by the kilogram.
        let details = crate::repository::product::ProductDetails {
            name: "Beras curah".to_string(),
            barcode: None,
            category_id: None,
            purchase_price: Money::from_minor(12),
            selling_price: Money::from_minor(15),
            unit: "g".to_string(),
            alt_unit: Some("kg".to_string()),
            alt_unit_factor: Some(1000),
            min_stock: 1000,
        };
        db.products()
            .update_details(&p.id, details, &kasir_core::NoCategories)
            .await
            .unwrap();

        let quarter_kilo = SaleItemInput::new(&p.id, 250);
        let two_kilos = SaleItemInput {
            unit: Some("kg".to_string()),
            ..SaleItemInput::new(&p.id, 2)
        };
        let created = db
            .sale_service()
            .create_sale(CreateSaleRequest::finalized(vec![quarter_kilo, two_kilos]))
            .await
            .unwrap();

        assert_eq!(created.items[0].quantity, 250);
        assert_eq!(created.items[1].quantity, 2000);
        assert_eq!(created.sale.total.minor(), 2250 * 15);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 2750);

        let movements = db
            .ledger()
            .query(&LedgerFilter::for_product(&p.id).movement_type(MovementType::Out), 10)
            .await
            .unwrap();
        assert_eq!(movements[0].quantity_after, 2750);
        assert_eq!(movements[1].quantity_before, 5000);
    }

    #[tokio::test]
    async fn test_alternate_unit_converted_to_base() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 60, 1000, 1500).await;
        let details = crate::repository::product::ProductDetails {
            name: p.name.clone(),
            barcode: None,
            category_id: None,
            purchase_price: p.purchase_price,
            selling_price: p.selling_price,
            unit: "pcs".to_string(),
            alt_unit: Some("dus".to_string()),
            alt_unit_factor: Some(24),
            min_stock: 0,
        };
        db.products()
            .update_details(&p.id, details, &kasir_core::NoCategories)
            .await
            .unwrap();

        let item = SaleItemInput {
            unit: Some("dus".to_string()),
            ..SaleItemInput::new(&p.id, 2)
        };
        let created = db
            .sale_service()
            .create_sale(CreateSaleRequest::finalized(vec![item]))
            .await
            .unwrap();

        assert_eq!(created.items[0].quantity, 48);
        assert_eq!(created.sale.total.minor(), 48 * 1500);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        const TASKS: i64 = 8;
        const QTY: i64 = 3;

        let path = std::env::temp_dir().join(format!("kasir-oversell-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        let p = product(&db, "TB-1", (TASKS - 1) * QTY, 1000, 1500).await;

        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let service = db.sale_service();
            let product_id = p.id.clone();
            handles.push(tokio::spawn(async move {
                service
                    .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(
                        product_id, QTY,
                    )]))
                    .await
            }));
        }

        let mut successes = 0;
        let mut shortfalls = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => {
                    assert_eq!(e.code(), crate::error::ErrorCode::InsufficientStock, "{e}");
                    shortfalls += 1;
                }
            }
        }

        assert_eq!(successes, TASKS - 1);
        assert_eq!(shortfalls, 1);
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 0);

        let report = db.inventory().audit_product(&p.id).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.defects);
        // Opening entry plus one per successful sale.
        assert_eq!(report.entries as i64, successes + 1);

        db.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
