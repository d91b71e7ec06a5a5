use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid date or time: {0}")]
    InvalidDate(String),

    #[error("Schedule store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Concurrent upsert for meeting {0}, serializing")]
    ConcurrentUpsert(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn invalid_date<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDate(msg.into())
    }

    pub fn store_corrupted<S: Into<String>>(msg: S) -> Self {
        Self::StoreCorrupted(msg.into())
    }

    pub fn dispatch<S: Into<String>>(msg: S) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
