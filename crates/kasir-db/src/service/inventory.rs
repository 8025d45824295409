//! # Inventory Adjustment Service
//!
//! Stock changes that are not sales: receiving, recounts and write-offs.
//! Each one is a stock primitive plus a ledger append in one transaction.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┬──────────────────────┐
//! │ operation        │ stock primitive              │ ledger entry         │
//! ├──────────────────┼──────────────────────────────┼──────────────────────┤
//! │ receive_stock    │ stock += q, raise cost       │ in, purchase         │
//! │ adjust_stock     │ lock, stock = n (CAS)        │ adjustment, manual   │
//! │ record_damage    │ stock -= q WHERE stock >= q  │ damaged | expired    │
//! └──────────────────┴──────────────────────────────┴──────────────────────┘
//! ```

use serde::Deserialize;
use tracing::{debug, info, warn};

use kasir_core::ledger::{damage_movement_type, verify_chain, ChainReport, NewStockMovement};
use kasir_core::report::{low_stock, stock_value, LowStockEntry, StockValueReport};
use kasir_core::validation::{
    normalize_optional, validate_extended_amount, validate_label, validate_non_negative,
    validate_quantity, validate_stock_level,
};
use kasir_core::{CoreError, Money, MovementReference, MovementType, StockMovement};

use crate::error::DbResult;
use crate::pool::Database;
use crate::repository::ledger::{LedgerFilter, StockMovementRepository};
use crate::repository::product::ProductRepository;

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiveStock {
    pub product_id: String,
    pub quantity: i64,
    /// Base unit when absent.
    pub unit: Option<String>,
    /// Cost per base unit.
    pub unit_cost: Money,
    pub supplier_ref: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdjustStock {
    pub product_id: String,
    /// The counted stock, in base units.
    pub new_stock: i64,
    pub reason: String,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordDamage {
    pub product_id: String,
    pub quantity: i64,
    /// Mentions of expiry record the loss as `expired`.
    pub reason: String,
    pub created_by: Option<String>,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone)]
pub struct InventoryService {
    db: Database,
}

impl InventoryService {
    pub fn new(db: Database) -> Self {
        InventoryService { db }
    }

    /// Adds received goods to stock and raises the purchase price if this
    /// receipt cost more than the current one.
    pub async fn receive_stock(&self, request: ReceiveStock) -> DbResult<StockMovement> {
        validate_non_negative("unit_cost", request.unit_cost)?;
        let supplier_ref = normalize_optional("supplier_ref", request.supplier_ref.as_deref(), 100)?;
        let notes = normalize_optional("notes", request.notes.as_deref(), 500)?;

        let product = self.db.products().get_active(&request.product_id).await?;
        let quantity = product.to_base_quantity(request.quantity, request.unit.as_deref())?;
        validate_quantity(quantity)?;
        validate_extended_amount("total_cost", request.unit_cost, quantity)?;

        debug!(product_id = %product.id, quantity, "receive_stock");

        let mut tx = self.db.begin().await?;

        let updated = ProductRepository::adjust_stock_in(&mut tx, &product.id, quantity).await?;
        let price_raised =
            ProductRepository::raise_purchase_price_in(&mut tx, &product.id, request.unit_cost)
                .await?;

        let entry = NewStockMovement::for_delta(
            &updated.id,
            &updated.name,
            MovementType::In,
            updated.stock - quantity,
            quantity,
        )
        .with_unit_cost(request.unit_cost)
        .with_reference(MovementReference::Purchase { supplier_ref })
        .with_notes(notes)
        .with_created_by(request.created_by);
        let movement = StockMovementRepository::append_in(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            product_id = %movement.product_id,
            quantity,
            stock = movement.quantity_after,
            price_raised,
            "Stock received"
        );
        Ok(movement)
    }

    /// Sets stock to a counted level, recording the difference.
    ///
    /// ## Errors
    /// - `NoOpAdjustment` when the count equals current stock; nothing is
    ///   written
    pub async fn adjust_stock(&self, request: AdjustStock) -> DbResult<StockMovement> {
        validate_stock_level(request.new_stock)?;
        validate_label("reason", &request.reason, 255)?;

        debug!(product_id = %request.product_id, new_stock = request.new_stock, "adjust_stock");

        let mut tx = self.db.begin().await?;

        let product = ProductRepository::lock_in(&mut tx, &request.product_id).await?;
        let delta = request.new_stock - product.stock;
        if delta == 0 {
            drop(tx);
            warn!(product_id = %product.id, stock = product.stock, "Adjustment rejected, no change");
            return Err(CoreError::NoOpAdjustment {
                product_name: product.name,
                stock: product.stock,
            }
            .into());
        }

        let updated =
            ProductRepository::set_stock_in(&mut tx, &product.id, product.stock, request.new_stock)
                .await?;

        let entry = NewStockMovement::for_delta(
            &updated.id,
            &updated.name,
            MovementType::Adjustment,
            product.stock,
            delta,
        )
        .with_notes(Some(request.reason.trim().to_string()))
        .with_created_by(request.created_by);
        let movement = StockMovementRepository::append_in(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            product_id = %movement.product_id,
            before = movement.quantity_before,
            after = movement.quantity_after,
            delta,
            "Stock adjusted"
        );
        Ok(movement)
    }

    /// Writes off damaged or expired goods, valued at the purchase price.
    pub async fn record_damage(&self, request: RecordDamage) -> DbResult<StockMovement> {
        validate_quantity(request.quantity)?;
        validate_label("reason", &request.reason, 255)?;
        let movement_type = damage_movement_type(&request.reason);

        debug!(product_id = %request.product_id, quantity = request.quantity, %movement_type, "record_damage");

        let mut tx = self.db.begin().await?;

        let updated =
            match ProductRepository::try_decrement_in(&mut tx, &request.product_id, request.quantity)
                .await
            {
                Ok(product) => product,
                Err(e) => {
                    warn!(product_id = %request.product_id, error = %e, "Write-off rejected");
                    return Err(e);
                }
            };

        let entry = NewStockMovement::for_delta(
            &updated.id,
            &updated.name,
            movement_type,
            updated.stock + request.quantity,
            -request.quantity,
        )
        .with_unit_cost(updated.purchase_price)
        .with_notes(Some(request.reason.trim().to_string()))
        .with_created_by(request.created_by);
        let movement = StockMovementRepository::append_in(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            product_id = %movement.product_id,
            %movement_type,
            quantity = movement.quantity,
            loss = %movement.total_cost,
            "Stock written off"
        );
        Ok(movement)
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Active products at or below `min_stock`, emptiest first.
    pub async fn low_stock_report(&self) -> DbResult<Vec<LowStockEntry>> {
        let products = self.db.products().list_at_or_below_minimum().await?;
        Ok(low_stock(&products))
    }

    /// Cost and retail value of all active stock.
    pub async fn stock_value_report(&self) -> DbResult<StockValueReport> {
        let products = self.db.products().list_active(None).await?;
        Ok(stock_value(&products))
    }

    /// Ledger entries, newest first. The limit falls back to and is capped
    /// by the configured query limits.
    pub async fn query_ledger(&self, filter: &LedgerFilter) -> DbResult<Vec<StockMovement>> {
        let settings = self.db.settings();
        let limit = filter
            .limit
            .unwrap_or(settings.default_query_limit)
            .clamp(1, settings.max_query_limit);

        self.db.ledger().query(filter, limit).await
    }

    /// Walks a product's full history and compares it with live stock.
    pub async fn audit_product(&self, product_id: &str) -> DbResult<ChainReport> {
        let product = self
            .db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;
        let history = self.db.ledger().history(product_id).await?;

        let mut report = verify_chain(product_id, &history);
        report.check_live_stock(product.stock);

        if !report.is_consistent() {
            warn!(product_id, defects = report.defects.len(), "Ledger chain inconsistent");
        }
        Ok(report)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DbError, ErrorCode};
    use crate::service::fixtures::{memory_db, product};
    use crate::service::sale::{CreateSaleRequest, SaleItemInput};
    use kasir_core::StockStatus;

    fn receive(product_id: &str, quantity: i64, unit_cost: i64) -> ReceiveStock {
        ReceiveStock {
            product_id: product_id.to_string(),
            quantity,
            unit: None,
            unit_cost: Money::from_minor(unit_cost),
            supplier_ref: Some("PO-77".to_string()),
            notes: None,
            created_by: Some("gudang".to_string()),
        }
    }

    fn adjust(product_id: &str, new_stock: i64) -> AdjustStock {
        AdjustStock {
            product_id: product_id.to_string(),
            new_stock,
            reason: "recount".to_string(),
            created_by: None,
        }
    }

    fn damage(product_id: &str, quantity: i64, reason: &str) -> RecordDamage {
        RecordDamage {
            product_id: product_id.to_string(),
            quantity,
            reason: reason.to_string(),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_damage_beyond_stock_rejected() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 7, 1000, 1500).await;
        let before = db.ledger().count(Some(&p.id)).await.unwrap();

        let err = db
            .inventory()
            .record_damage(damage(&p.id, 20, "expired"))
            .await
            .unwrap_err();

        match err {
            DbError::Domain(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => assert_eq!((available, requested), (7, 20)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 7);
        assert_eq!(db.ledger().count(Some(&p.id)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_adjust_to_same_level_is_noop() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 7, 1000, 1500).await;
        let before = db.ledger().count(Some(&p.id)).await.unwrap();

        let err = db.inventory().adjust_stock(adjust(&p.id, 7)).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::NoOp);
        assert_eq!(db.ledger().count(Some(&p.id)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_adjust_records_both_endpoints() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 7, 1000, 1500).await;
        let inventory = db.inventory();

        let down = inventory.adjust_stock(adjust(&p.id, 4)).await.unwrap();
        assert_eq!(down.movement_type, MovementType::Adjustment);
        assert_eq!((down.quantity_before, down.quantity_after, down.quantity), (7, 4, 3));
        assert_eq!(down.total_cost, Money::zero());
        assert_eq!(down.notes.as_deref(), Some("recount"));

        let up = inventory.adjust_stock(adjust(&p.id, 9)).await.unwrap();
        assert_eq!((up.quantity_before, up.quantity_after, up.quantity), (4, 9, 5));
        assert_eq!(db.products().get_active(&p.id).await.unwrap().stock, 9);

        let negative = inventory.adjust_stock(adjust(&p.id, -1)).await.unwrap_err();
        assert_eq!(negative.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_receive_raises_cost_only_upward() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 0, 1000, 1500).await;
        let inventory = db.inventory();

        let cheaper = inventory.receive_stock(receive(&p.id, 10, 900)).await.unwrap();
        assert_eq!(cheaper.movement_type, MovementType::In);
        assert_eq!((cheaper.quantity_before, cheaper.quantity_after), (0, 10));
        assert_eq!(cheaper.total_cost.minor(), 9000);
        assert_eq!(cheaper.reference_id.as_deref(), Some("PO-77"));
        assert_eq!(
            db.products().get_active(&p.id).await.unwrap().purchase_price.minor(),
            1000
        );

        inventory.receive_stock(receive(&p.id, 5, 1200)).await.unwrap();
        let after = db.products().get_active(&p.id).await.unwrap();
        assert_eq!(after.purchase_price.minor(), 1200);
        assert_eq!(after.stock, 15);
    }

    #[tokio::test]
    async fn test_receipt_cost_out_of_range_rejected() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 4, 1000, 1500).await;
        let inventory = db.inventory();

        // Each unit is in range, the receipt total is not.
        let huge = receive(&p.id, 100_000, kasir_core::MAX_MONEY_MINOR);
        let err = inventory.receive_stock(huge).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let absurd = receive(&p.id, 1, i64::MAX);
        let err = inventory.receive_stock(absurd).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let after = db.products().get_active(&p.id).await.unwrap();
        assert_eq!(after.stock, 4);
        assert_eq!(after.purchase_price.minor(), 1000);
        assert_eq!(db.ledger().count(Some(&p.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_damage_type_follows_reason() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let inventory = db.inventory();

        let expired = inventory
            .record_damage(damage(&p.id, 2, "Kadaluarsa bulan ini"))
            .await
            .unwrap();
        assert_eq!(expired.movement_type, MovementType::Expired);
        assert_eq!(expired.total_cost.minor(), 2000);

        let broken = inventory
            .record_damage(damage(&p.id, 1, "botol pecah"))
            .await
            .unwrap();
        assert_eq!(broken.movement_type, MovementType::Damaged);
        assert_eq!((broken.quantity_before, broken.quantity_after), (8, 7));
    }

    #[tokio::test]
    async fn test_stock_conservation_across_operations() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;
        let inventory = db.inventory();
        let sales = db.sale_service();

        sales
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 3)]))
            .await
            .unwrap();
        inventory.receive_stock(receive(&p.id, 12, 1000)).await.unwrap();
        inventory.record_damage(damage(&p.id, 2, "penyok")).await.unwrap();
        inventory.adjust_stock(adjust(&p.id, 15)).await.unwrap();
        sales
            .create_sale(CreateSaleRequest::finalized(vec![SaleItemInput::new(&p.id, 4)]))
            .await
            .unwrap();

        let live = db.products().get_active(&p.id).await.unwrap().stock;
        assert_eq!(live, 11);

        let report = inventory.audit_product(&p.id).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.defects);
        assert_eq!(report.entries, 6);
        assert_eq!(report.last_after, Some(live));
        assert_eq!(report.net_delta, live);

        let newest = inventory
            .query_ledger(&LedgerFilter::for_product(p.id.clone()).limit(1))
            .await
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].quantity_after, live);
        assert_eq!(newest[0].movement_type, MovementType::Out);

        let adjustments = inventory
            .query_ledger(&LedgerFilter::for_product(p.id.clone()).movement_type(MovementType::Adjustment))
            .await
            .unwrap();
        assert_eq!(adjustments.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_rows_cannot_be_rewritten() {
        let db = memory_db().await;
        let p = product(&db, "TB-1", 10, 1000, 1500).await;

        let update = sqlx::query("UPDATE stock_movements SET quantity_after = 99 WHERE product_id = ?")
            .bind(&p.id)
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements WHERE product_id = ?")
            .bind(&p.id)
            .execute(db.pool())
            .await;
        assert!(delete.is_err());

        let report = db.inventory().audit_product(&p.id).await.unwrap();
        assert_eq!(report.entries, 1);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_low_stock_and_value_reports() {
        let db = memory_db().await;
        let empty = product(&db, "A", 0, 1000, 1500).await;
        let low = product(&db, "B", 3, 2000, 3000).await;
        product(&db, "C", 50, 500, 800).await;

        let report = db.inventory().low_stock_report().await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].product_id, empty.id);
        assert_eq!(report[0].status, StockStatus::Habis);
        assert_eq!(report[1].product_id, low.id);
        assert_eq!(report[1].status, StockStatus::Menipis);

        let value = db.inventory().stock_value_report().await.unwrap();
        assert_eq!(value.rows.len(), 3);
        assert_eq!(value.total_cost_value.minor(), 3 * 2000 + 50 * 500);
        assert_eq!(value.total_retail_value.minor(), 3 * 3000 + 50 * 800);
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let db = memory_db().await;
        let inventory = db.inventory();

        let err = inventory.adjust_stock(adjust("nope", 3)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = inventory.record_damage(damage("nope", 1, "x")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = inventory.receive_stock(receive("nope", 1, 100)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
