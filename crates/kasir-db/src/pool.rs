//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite, and the
//! [`Database`] handle that hands out repositories and services.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  KasirConfig::db_config() or DbConfig::new(path)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├──► db.sale_service()  CreateSale, FinalizeSale, ...            │
//! │       ├──► db.inventory()     ReceiveStock, AdjustStock, ...           │
//! │       └──► db.finance()       ComputeHPP, FinancialSummary             │
//! │                                                                         │
//! │  Concurrent sales run on different connections; SQLite serializes      │
//! │  writers, the conditional decrement keeps stock from going negative.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! WAL is enabled for file databases so report reads never block the
//! writers. A `busy_timeout` makes a writer wait for the lock instead of
//! failing immediately.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use kasir_core::report::HppCostBasis;
use kasir_core::{Money, DEFAULT_INVOICE_PREFIX, DEFAULT_INVOICE_RETRIES};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::expense::ExpenseRepository;
use crate::repository::ledger::StockMovementRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::service::finance::FinanceService;
use crate::service::inventory::InventoryService;
use crate::service::sale::SaleService;

// =============================================================================
// Configuration
// =============================================================================

/// Behaviour knobs of the ledger services.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    /// Prefix of generated invoice numbers.
    pub invoice_prefix: String,
    /// Collisions regenerated before a sale fails.
    pub invoice_retries: u32,
    /// Allowed gap between the caller's subtotal and the line sum.
    pub totals_tolerance: Money,
    pub hpp_cost_basis: HppCostBasis,
    /// Ledger query limit when the caller gives none.
    pub default_query_limit: u32,
    /// Hard cap on ledger query limits.
    pub max_query_limit: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            invoice_prefix: DEFAULT_INVOICE_PREFIX.to_string(),
            invoice_retries: DEFAULT_INVOICE_RETRIES,
            totals_tolerance: Money::zero(),
            hpp_cost_basis: HppCostBasis::Current,
            default_query_limit: 100,
            max_query_limit: 1000,
        }
    }
}

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/kasir.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Pool acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits for SQLite's write lock.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,

    /// Settings handed to the services.
    pub ledger: LedgerSettings,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
            ledger: LedgerSettings::default(),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Replaces the service settings.
    pub fn ledger(mut self, ledger: LedgerSettings) -> Self {
        self.ledger = ledger;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// An in-memory database lives as long as its connection, so the pool
    /// holds exactly one connection and never recycles it.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
            ledger: LedgerSettings::default(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository and service access.
///
/// Cheap to clone: the pool and settings are shared.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./kasir.db")).await?;
/// let sale = db.sale_service().create_sale(request).await?;
/// let report = db.finance().compute_hpp(window).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
    settings: Arc<LedgerSettings>,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite: WAL, NORMAL synchronous, foreign keys,
    ///    busy timeout
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let (connect_options, pool_options) = if config.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .acquire_timeout(config.connect_timeout)
                .idle_timeout(None)
                .max_lifetime(None);
            (options, pool)
        } else {
            let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
            let options = SqliteConnectOptions::from_str(&connect_url)
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                // Readers don't block writers, writers don't block readers
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                // SQLite has them disabled by default
                .foreign_keys(true)
                .busy_timeout(config.busy_timeout)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(config.connect_timeout)
                .idle_timeout(Some(config.idle_timeout));
            (options, pool)
        };

        debug!("Connection options configured");

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            settings: Arc::new(config.ledger),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    ///
    /// For advanced queries not covered by repositories.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Service settings this handle was built with.
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Begins a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    /// Returns the product repository.
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Returns the stock movement ledger repository.
    pub fn ledger(&self) -> StockMovementRepository {
        StockMovementRepository::new(self.pool.clone())
    }

    /// Returns the sale repository.
    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    /// Returns the expense repository.
    pub fn expenses(&self) -> ExpenseRepository {
        ExpenseRepository::new(self.pool.clone())
    }

    /// Sale Transaction Manager.
    pub fn sale_service(&self) -> SaleService {
        SaleService::new(self.clone())
    }

    /// Inventory Adjustment Service.
    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(self.clone())
    }

    /// Cost & Financial Aggregator.
    pub fn finance(&self) -> FinanceService {
        FinanceService::new(self.clone())
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, all repository operations will fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/kasir-test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_secs(1));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_ledger_is_append_only_at_storage_level() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO products (id, code, name, selling_price, created_at, updated_at)
             VALUES ('p-1', 'TB-1', 'Teh Botol', 1500, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO stock_movements
                (id, product_id, product_name, movement_type, quantity,
                 quantity_before, quantity_after, created_at)
             VALUES ('m-1', 'p-1', 'Teh Botol', 'in', 5, 0, 5, ?)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let update = sqlx::query("UPDATE stock_movements SET quantity = 6")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements")
            .execute(db.pool())
            .await;
        assert!(delete.is_err());
    }
}
