//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use nextslot_shared::SharedError;

use crate::domains::{DomainError, StoreError};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Tenant identification required")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Storage
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidHostname(..)
            | DomainError::InvalidSubdomainLabel(..)
            | DomainError::ReservedHostname(_) => ApiError::Validation(err.to_string()),
            DomainError::HostnameTaken(_) | DomainError::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            DomainError::TenantNotFound => ApiError::Unauthorized,
            DomainError::NotFound => ApiError::NotFound,
            DomainError::Store(StoreError::Conflict(msg)) => ApiError::Conflict(msg),
            DomainError::Store(StoreError::NotFound) => ApiError::NotFound,
            DomainError::Store(StoreError::Database(msg)) => {
                tracing::error!("Database error: {}", msg);
                ApiError::Database(msg)
            }
        }
    }
}

impl From<SharedError> for ApiError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Validation(msg) => ApiError::Validation(msg),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
