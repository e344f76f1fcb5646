//! Application error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    /// Missing or malformed search query (e.g. more than one product type
    /// where exactly one is required).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A page cursor token that fails structural validation.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A projection requested a disallowed computed attribute family.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("{0}")]
    NotFound(String),

    /// The response shaper was handed a null record. This is a contract
    /// breach between the paginator and the shaper, not a caller error.
    #[error("record is missing or null")]
    InvalidRecord,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidAttribute(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRecord => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Validation errors carry their message; internal failures stay vague.
        let body = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            AppError::InvalidRecord => {
                tracing::error!("response shaper received a null record");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
