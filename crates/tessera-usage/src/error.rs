use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Database error: {0}")]
    Database(#[from] tessera_database::DatabaseError),

    #[error("Unknown limit type: {0}")]
    UnknownLimitType(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),
}

pub type UsageResult<T> = Result<T, UsageError>;
