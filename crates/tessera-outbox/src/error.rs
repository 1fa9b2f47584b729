use thiserror::Error;

/// Errors produced by the outbox store and dispatcher.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] tessera_database::DatabaseError),

    #[error("No publisher registered for event type '{event_type}' from source '{event_source}'")]
    NoPublisher {
        event_type: String,
        event_source: String,
    },

    #[error("Publisher for event type '{event_type}' from source '{event_source}' is already registered")]
    DuplicatePublisher {
        event_type: String,
        event_source: String,
    },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
