//! Configuration for the tessera backend.
//!
//! Configuration is loaded from a JSON file with serde defaults for every
//! field, so older config files keep working when new knobs are added.
//! A small set of environment variables can override values at runtime.

use crate::CoreResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Maximum unpublished rows read per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between polls when idle.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Days a published row stays in the operational table before archiving.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Seconds between archive sweeps.
    #[serde(default = "default_archive_sweep_interval_secs")]
    pub archive_sweep_interval_secs: u64,
    /// Initial state of the publishing toggle.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
            retention_days: default_retention_days(),
            archive_sweep_interval_secs: default_archive_sweep_interval_secs(),
            publishing_enabled: true,
        }
    }
}

/// Delivery pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Capacity of the in-process delivery queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of delivery workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Maximum send attempts per notification.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Initial retry delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum retry delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Per-attempt send timeout in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Seconds the breaker stays open before a trial send.
    #[serde(default = "default_breaker_open_secs")]
    pub breaker_open_secs: u64,
    /// Seconds between durability sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Days a terminal notification stays before archiving.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_secs: default_breaker_open_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_days: default_retention_days(),
        }
    }
}

/// Usage ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Bounded retries on serialization conflicts before surfacing denial.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Plan caps keyed by limit type name (e.g. `"projects": 3`). A
    /// missing entry means unlimited.
    #[serde(default)]
    pub caps: std::collections::HashMap<String, i64>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            caps: std::collections::HashMap::new(),
        }
    }
}

/// Main backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub usage: UsageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            outbox: OutboxConfig::default(),
            notify: NotifyConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl Config {
    /// Create a Config with default values, then apply environment overrides.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a file if it exists, falling back to defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("TESSERA_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(enabled) = std::env::var("TESSERA_PUBLISHING_ENABLED") {
            if let Ok(value) = enabled.parse::<bool>() {
                self.outbox.publishing_enabled = value;
            }
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retention_days() -> i64 {
    30
}

fn default_archive_sweep_interval_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_worker_count() -> usize {
    4
}

fn default_max_attempts() -> i64 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_open_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_conflict_retries() -> u32 {
    3
}
