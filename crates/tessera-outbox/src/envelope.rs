use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_database::OutboxMessage;

/// Payload handed to a publisher for a single outbox row.
///
/// Carries everything a handler needs to act on the event without
/// reading the outbox table itself. The `correlation_id` ties the
/// delivery back to the request that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub source: String,
    pub object_id: String,
    pub triggered_by: Option<String>,
    pub payload: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn from_message(message: &OutboxMessage) -> Self {
        Self {
            event_type: message.event_type.clone(),
            source: message.source.clone(),
            object_id: message.object_id.clone(),
            triggered_by: message.triggered_by.clone(),
            payload: message.payload.clone(),
            correlation_id: message.correlation_id.clone(),
            created_at: message.created_at,
        }
    }

    /// Deserializes the JSON payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> crate::OutboxResult<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
