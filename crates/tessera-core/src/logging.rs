//! Logging initialization.
//!
//! All tessera services log through `tracing` with structured fields. The
//! subscriber prefers `RUST_LOG` when set and falls back to the configured
//! default level.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// Safe to call more than once; subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error)
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("backend started");
/// ```
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
