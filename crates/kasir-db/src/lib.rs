//! # kasir-db: Persistence and Services for the Kasir POS Ledger
//!
//! SQLite storage (sqlx) for the catalog, sales, the stock ledger and
//! expenses, plus the services that keep stock and ledger in step.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kasir POS Data Flow                              │
//! │                                                                         │
//! │  HTTP / CLI layer (out of scope)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kasir-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Services    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │               │    │               │    │  (embedded)  │  │   │
//! │  │   │ SaleService   │───►│ ProductRepo   │    │              │  │   │
//! │  │   │ Inventory     │    │ LedgerRepo    │    │ 001_initial  │  │   │
//! │  │   │ Finance       │    │ SaleRepo      │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │           ▼                                                     │   │
//! │  │   Database (pool.rs): SqlitePool + LedgerSettings               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool and service settings
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - Tracing bootstrap
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database and API error types
//! - [`repository`] - Table access (products, ledger, sales, expenses)
//! - [`service`] - Transactional operations and reports
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kasir_db::{Database, KasirConfig};
//!
//! let config = KasirConfig::load_or_default(None);
//! kasir_db::logging::init_tracing(&config.logging.filter);
//! let db = Database::new(config.db_config()).await?;
//!
//! let sale = db.sale_service().create_sale(request).await?;
//! let hpp = db.finance().compute_hpp(window).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, KasirConfig};
pub use error::{ApiError, DbError, DbResult, ErrorCode};
pub use pool::{Database, DbConfig, LedgerSettings};

// Repository re-exports for convenience
pub use repository::expense::{ExpenseRepository, NewExpense};
pub use repository::ledger::{LedgerFilter, StockMovementRepository};
pub use repository::product::{NewProduct, ProductDetails, ProductRepository};
pub use repository::sale::{SaleFilter, SaleMeta, SaleRepository};

// Service re-exports
pub use service::finance::FinanceService;
pub use service::inventory::{AdjustStock, InventoryService, ReceiveStock, RecordDamage};
pub use service::sale::{CreateSaleRequest, SaleItemInput, SaleService};
