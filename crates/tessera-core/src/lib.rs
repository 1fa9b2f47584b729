//! Core types, configuration, and logging for the tessera backend.

mod config;
mod error;
mod logging;

pub use config::{Config, NotifyConfig, OutboxConfig, UsageConfig, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
