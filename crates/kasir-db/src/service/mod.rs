//! # Services
//!
//! Operations that span several repositories inside one transaction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SaleService        create / finalize / edit / delete sales             │
//! │  InventoryService   receive / adjust / write off stock, stock reports   │
//! │  FinanceService     HPP and profit for a date window (read-only)        │
//! │                                                                         │
//! │  Every stock change goes through the same three steps:                  │
//! │    1. begin, first statement is a write (holds the write lock)          │
//! │    2. stock primitive on products + ledger append                       │
//! │    3. commit; any error before this drops the transaction (rollback)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod finance;
pub mod inventory;
pub mod sale;

#[cfg(test)]
pub(crate) mod fixtures {
    use kasir_core::{Money, NoCategories, Product};

    use crate::pool::{Database, DbConfig};
    use crate::repository::product::{NewProduct, ProductDetails};

    pub async fn memory_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// Stock in `stock`, bought at `purchase`, sold at `selling`, min stock 5.
    pub async fn product(
        db: &Database,
        code: &str,
        stock: i64,
        purchase: i64,
        selling: i64,
    ) -> Product {
        let new = NewProduct {
            code: code.to_string(),
            details: ProductDetails {
                name: format!("Produk {}", code),
                barcode: None,
                category_id: None,
                purchase_price: Money::from_minor(purchase),
                selling_price: Money::from_minor(selling),
                unit: "pcs".to_string(),
                alt_unit: None,
                alt_unit_factor: None,
                min_stock: 5,
            },
            opening_stock: stock,
            created_by: None,
        };
        db.products().create(new, &NoCategories).await.unwrap()
    }
}
