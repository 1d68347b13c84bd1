use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::memory::MemoryError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Embedding or generation backend failed; the request may be resent
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    retryable: bool,
}

impl From<MemoryError> for ApiError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Validation(msg) => ApiError::BadRequest(msg),
            MemoryError::NotFound(id) => ApiError::NotFound(format!("conversation {}", id)),
            e @ (MemoryError::Embedding(_) | MemoryError::Generation(_)) => {
                ApiError::Unavailable(format!("{:#}", anyhow::Error::from(e)))
            }
            e @ (MemoryError::Persistence { .. } | MemoryError::Storage(_)) => {
                ApiError::DatabaseError(format!("{:#}", anyhow::Error::from(e)))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, retryable) = match self {
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg, false)
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg, false)
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError", msg, false)
            }
            ApiError::Unavailable(msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Unavailable", msg, true)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            retryable,
        });

        (status, body).into_response()
    }
}
