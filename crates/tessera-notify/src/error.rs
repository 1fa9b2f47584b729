use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Database error: {0}")]
    Database(#[from] tessera_database::DatabaseError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send timed out after {0}s")]
    Timeout(u64),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type NotifyResult<T> = Result<T, NotifyError>;
