//! # Database Error Types
//!
//! Error types for database operations and the transactional services,
//! plus the `{ code, message }` shape handed to the outer API layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          CoreError (kasir-core)            │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError::{NotFound, Unique..}       DbError::Domain(CoreError)        │
//! │       │                                   │                             │
//! │       └─────────────┬─────────────────────┘                             │
//! │                     ▼                                                   │
//! │  DbError::code() → ErrorCode → http_status()                           │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  ApiError { code, message }  ← persistence details logged, not leaked  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error returned from inside a transaction drops the
//! `sqlx::Transaction` uncommitted, which rolls it back.

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use kasir_core::{CoreError, ValidationError};

/// Database and service errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    /// - Soft-deleted record
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate product code or barcode
    /// - Invoice number collision (retried before surfacing)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed. Also raised by the append-only triggers on
    /// `stock_movements`.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed, including exhausted invoice retries.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),

    /// Business rule rejected the operation. Nothing was written.
    #[error(transparent)]
    Domain(#[from] CoreError),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True for a unique violation on the given column (`table.column`).
    pub fn is_unique_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(column))
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(err) => Some(err),
            _ => None,
        }
    }

    /// Machine-readable category.
    pub fn code(&self) -> ErrorCode {
        match self {
            DbError::NotFound { .. } => ErrorCode::NotFound,
            DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } => {
                ErrorCode::ValidationError
            }
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::TransactionFailed(_)
            | DbError::PoolExhausted => ErrorCode::DatabaseError,
            DbError::Internal(_) => ErrorCode::Internal,
            DbError::Domain(err) => match err {
                CoreError::ProductNotFound(_) | CoreError::SaleNotFound(_) => ErrorCode::NotFound,
                CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                CoreError::AlreadyFinalized { .. } | CoreError::InvalidSaleState { .. } => {
                    ErrorCode::InvalidState
                }
                CoreError::NoOpAdjustment { .. } => ErrorCode::NoOp,
                CoreError::LedgerInvariant { .. } => ErrorCode::Internal,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// API Error
// =============================================================================

/// Error codes for the outer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ErrorCode {
    /// Input validation failed (400)
    ValidationError,
    /// Product or sale missing or soft-deleted (404)
    NotFound,
    /// Requested quantity exceeds stock (409)
    InsufficientStock,
    /// Sale state machine violation (400)
    InvalidState,
    /// Adjustment with zero delta (400)
    NoOp,
    /// Store failure, rolled back (500)
    DatabaseError,
    /// Invariant broken inside the service (500)
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError | ErrorCode::InvalidState | ErrorCode::NoOp => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::InsufficientStock => 409,
            ErrorCode::DatabaseError | ErrorCode::Internal => 500,
        }
    }
}

/// What the HTTP/CLI layer receives when an operation fails.
///
/// ```json
/// {
///   "code": "INSUFFICIENT_STOCK",
///   "message": "Insufficient stock for Teh Botol: available 7, requested 20 (short by 13)"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.code.http_status()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let code = err.code();
        match err {
            DbError::ConnectionFailed(_) => ApiError::new(code, "Database connection failed"),
            DbError::MigrationFailed(_) => ApiError::new(code, "Database migration failed"),
            DbError::PoolExhausted => ApiError::new(code, "Database pool exhausted"),
            DbError::QueryFailed(e) => {
                tracing::error!("Database query failed: {}", e);
                ApiError::new(code, "Database operation failed")
            }
            DbError::TransactionFailed(e) => {
                tracing::error!("Transaction failed: {}", e);
                ApiError::new(code, "Database transaction failed")
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                ApiError::new(code, "Invalid reference")
            }
            DbError::Internal(e) => {
                tracing::error!("Internal database error: {}", e);
                ApiError::new(code, "Database operation failed")
            }
            DbError::Domain(inner @ CoreError::LedgerInvariant { .. }) => {
                tracing::error!(error = %inner, "Ledger invariant violated");
                ApiError::new(code, "Stock ledger rejected the change")
            }
            other => ApiError::new(code, other.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        DbError::Domain(err).into()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
