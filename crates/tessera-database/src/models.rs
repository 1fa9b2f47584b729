//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbox message - one row per emitted cross-module event.
///
/// Written in the same transaction as the business mutation it announces.
/// Mutated only by the dispatcher, which flips `published` after a
/// registered publisher completes successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    /// Event type identifier, e.g. `project.created`.
    pub event_type: String,
    /// Owning module that emitted the event.
    pub source: String,
    /// Actor that triggered the mutation, when known.
    pub triggered_by: Option<String>,
    /// Identifier of the business object the event is about.
    pub object_id: String,
    /// Serialized event payload (JSON).
    pub payload: String,
    pub published: bool,
    /// Correlation id carried through the delivery envelope.
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New outbox message for insertion.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub event_type: String,
    pub source: String,
    pub triggered_by: Option<String>,
    pub object_id: String,
    pub payload: String,
    pub correlation_id: String,
}

/// Archived outbox message - terminal sink after the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedOutboxMessage {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub triggered_by: Option<String>,
    pub object_id: String,
    pub payload: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

/// Delivery status of a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Queued outbound notification - drives the delivery pipeline state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: String,
    /// Destination address (email, phone number, webhook URL).
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub attempt_count: i64,
    pub max_attempts: i64,
    /// Earliest time the next attempt may run.
    pub next_attempt_at: DateTime<Utc>,
    /// After this point the message is expired and never retried.
    pub expires_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New notification for insertion.
#[derive(Debug, Clone)]
pub struct NewQueuedNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub max_attempts: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Usage record - current consumption for one (user, limit type, period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub limit_type: String,
    /// Billing period key, e.g. `2026-08`; empty for lifetime limits.
    pub period: String,
    pub used: i64,
    pub updated_at: DateTime<Utc>,
}
