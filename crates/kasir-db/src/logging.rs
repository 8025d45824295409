//! Tracing bootstrap for binaries embedding the ledger.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor configuration provide one.
pub const DEFAULT_LOG_FILTER: &str = "info,kasir=debug,sqlx=warn";

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `filter`; an unparsable `filter` falls back to
/// [`DEFAULT_LOG_FILTER`]. Calling it twice is harmless, the second install
/// is ignored.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
