use std::fmt::Display;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("provider unavailable: {0}")]
    Provider(String),

    /// One store applied a change while its counterpart failed. The
    /// relational side stays committed; the index is repaired by a later
    /// purge rather than a rollback.
    #[error("store consistency warning: {0}")]
    Consistency(String),

    #[error("database error: {0}")]
    Database(diesel::result::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::Internal(error.to_string())
    }

    /// Terminal, readable message for the query layer. Internal detail
    /// (backtraces, driver errors) is never exposed here.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::UnsupportedFormat(mime) => format!("unsupported file type: {mime}"),
            AppError::Validation(message) => message.clone(),
            AppError::Provider(_) => "an upstream provider is unavailable".to_string(),
            AppError::Consistency(_) | AppError::Database(_) | AppError::Storage(_) | AppError::Internal(_) => {
                "internal error".to_string()
            }
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found("record"),
            other => AppError::Database(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::Storage(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Provider(value.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
