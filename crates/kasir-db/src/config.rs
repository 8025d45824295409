//! # Ledger Configuration
//!
//! Configuration for the database and the ledger services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KASIR_DB_PATH=/var/lib/kasir/kasir.db                              │
//! │     KASIR_HPP_COST_BASIS=snapshot                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kasir-pos/kasir.toml (Linux)                             │
//! │     ~/Library/Application Support/com.kasir.pos/kasir.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kasir.toml
//! [database]
//! path = "/var/lib/kasir/kasir.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [sales]
//! invoice_prefix = "INV"
//! invoice_retries = 5
//! totals_tolerance = 0      # minor units
//!
//! [reports]
//! hpp_cost_basis = "current"  # current | snapshot
//! default_query_limit = 100
//! max_query_limit = 1000
//!
//! [logging]
//! filter = "info,kasir=debug,sqlx=warn"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use kasir_core::report::HppCostBasis;
use kasir_core::{Money, DEFAULT_INVOICE_PREFIX, DEFAULT_INVOICE_RETRIES};

use crate::logging::DEFAULT_LOG_FILTER;
use crate::pool::{DbConfig, LedgerSettings};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No platform config directory available")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSettings {
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,

    /// Invoice collisions regenerated before the sale fails.
    #[serde(default = "default_invoice_retries")]
    pub invoice_retries: u32,

    /// Allowed subtotal drift against the line sum, in minor units.
    #[serde(default)]
    pub totals_tolerance: i64,
}

fn default_invoice_prefix() -> String {
    DEFAULT_INVOICE_PREFIX.to_string()
}

fn default_invoice_retries() -> u32 {
    DEFAULT_INVOICE_RETRIES
}

impl Default for SalesSettings {
    fn default() -> Self {
        SalesSettings {
            invoice_prefix: default_invoice_prefix(),
            invoice_retries: default_invoice_retries(),
            totals_tolerance: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default)]
    pub hpp_cost_basis: HppCostBasis,

    #[serde(default = "default_query_limit")]
    pub default_query_limit: u32,

    #[serde(default = "default_max_query_limit")]
    pub max_query_limit: u32,
}

fn default_query_limit() -> u32 {
    100
}

fn default_max_query_limit() -> u32 {
    1000
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            hpp_cost_basis: HppCostBasis::default(),
            default_query_limit: default_query_limit(),
            max_query_limit: default_max_query_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// KasirConfig
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KasirConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sales: SalesSettings,

    #[serde(default)]
    pub reports: ReportSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl KasirConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kasir.toml), when it exists
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        let prefix = self.sales.invoice_prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(format!(
                "sales.invoice_prefix must be non-empty ASCII alphanumeric, got '{}'",
                self.sales.invoice_prefix
            )));
        }

        if self.sales.totals_tolerance < 0 {
            return Err(ConfigError::Invalid(
                "sales.totals_tolerance must not be negative".into(),
            ));
        }

        if self.reports.default_query_limit == 0
            || self.reports.default_query_limit > self.reports.max_query_limit
        {
            return Err(ConfigError::Invalid(format!(
                "reports.default_query_limit must be in 1..={}",
                self.reports.max_query_limit
            )));
        }

        Ok(())
    }

    /// Applies `KASIR_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KASIR_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(max) = lookup("KASIR_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid KASIR_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(filter) = lookup("KASIR_LOG") {
            self.logging.filter = filter;
        }

        if let Some(prefix) = lookup("KASIR_INVOICE_PREFIX") {
            self.sales.invoice_prefix = prefix;
        }

        if let Some(basis) = lookup("KASIR_HPP_COST_BASIS") {
            match basis.parse::<HppCostBasis>() {
                Ok(parsed) => {
                    debug!(basis = %parsed, "Overriding HPP cost basis from environment");
                    self.reports.hpp_cost_basis = parsed;
                }
                Err(_) => warn!(value = %basis, "Unknown HPP cost basis in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kasir", "pos")
            .map(|dirs| dirs.config_dir().join("kasir.toml"))
    }

    /// Database file to open: configured path, else the platform data dir,
    /// else `kasir.db` in the working directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }

        directories::ProjectDirs::from("com", "kasir", "pos")
            .map(|dirs| dirs.data_dir().join("kasir.db"))
            .unwrap_or_else(|| PathBuf::from("kasir.db"))
    }

    /// Service settings derived from `[sales]` and `[reports]`.
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            invoice_prefix: self.sales.invoice_prefix.trim().to_string(),
            invoice_retries: self.sales.invoice_retries,
            totals_tolerance: Money::from_minor(self.sales.totals_tolerance),
            hpp_cost_basis: self.reports.hpp_cost_basis,
            default_query_limit: self.reports.default_query_limit,
            max_query_limit: self.reports.max_query_limit,
        }
    }

    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .ledger(self.ledger_settings())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
