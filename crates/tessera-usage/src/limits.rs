use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UsageError, UsageResult};

/// Kinds of consumption the ledger tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Projects,
    Seats,
    ApiCalls,
    StorageMb,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Projects => "projects",
            LimitType::Seats => "seats",
            LimitType::ApiCalls => "api_calls",
            LimitType::StorageMb => "storage_mb",
        }
    }

    pub fn from_str(s: &str) -> UsageResult<Self> {
        match s {
            "projects" => Ok(LimitType::Projects),
            "seats" => Ok(LimitType::Seats),
            "api_calls" => Ok(LimitType::ApiCalls),
            "storage_mb" => Ok(LimitType::StorageMb),
            other => Err(UsageError::UnknownLimitType(other.to_string())),
        }
    }

    /// Whether usage resets per billing month. Non-periodic limits use
    /// an empty period key and accumulate for the account's lifetime.
    pub fn periodic(&self) -> bool {
        matches!(self, LimitType::ApiCalls)
    }

    /// Period key for a point in time: `YYYY-MM` for periodic limits,
    /// empty otherwise.
    pub fn period_key(&self, at: DateTime<Utc>) -> String {
        if self.periodic() {
            format!("{:04}-{:02}", at.year(), at.month())
        } else {
            String::new()
        }
    }
}

/// Per-plan caps, keyed by limit type. A missing entry means unlimited.
#[derive(Debug, Clone, Default)]
pub struct LimitSet {
    caps: HashMap<LimitType, i64>,
}

impl LimitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the cap table from configuration. Unknown limit type names
    /// are rejected so a typo in the config file cannot silently grant
    /// unlimited usage.
    pub fn from_config(config: &tessera_core::UsageConfig) -> UsageResult<Self> {
        let mut set = Self::new();
        for (name, cap) in &config.caps {
            set.caps.insert(LimitType::from_str(name)?, *cap);
        }
        Ok(set)
    }

    pub fn with_cap(mut self, limit_type: LimitType, cap: i64) -> Self {
        self.caps.insert(limit_type, cap);
        self
    }

    /// Cap for a limit type; `None` means unlimited.
    pub fn cap(&self, limit_type: LimitType) -> Option<i64> {
        self.caps.get(&limit_type).copied()
    }
}
