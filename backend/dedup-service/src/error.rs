/// Error types for the dedup service
///
/// Errors are converted to JSON HTTP responses for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use idempotent_consumer::IdempotencyError;
use thiserror::Error;

use crate::queue::QueueError;

/// Result type for dedup-service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or incomplete input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Dedup store failure
    #[error("Storage error: {0}")]
    Storage(#[from] IdempotencyError),

    #[error("Ingestion queue is full")]
    QueueFull,

    #[error("Ingestion queue is closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => AppError::QueueFull,
            QueueError::Closed => AppError::QueueClosed,
        }
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::QueueFull | AppError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}
