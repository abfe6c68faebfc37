use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("{0}")]
    NotFound(String),

    #[error("At least one of start_date or end_date is required to delete readings")]
    EmptyFilter,

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
