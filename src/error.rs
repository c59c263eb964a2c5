//! # API Errors
//!
//! The outward-facing error taxonomy. Every fault that reaches the HTTP
//! boundary is converted into a structured JSON body:
//! `{error_code, message, request_id, timestamp}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// API error taxonomy
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Client input failed the compiled parameter schema
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Missing or invalid API key
    #[error("{0}")]
    Auth(String),

    /// Valid credential but insufficient role
    #[error("{0}")]
    Forbidden(String),

    /// Mapping/query/connector/log missing
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate path+method or malformed creation payload
    #[error("{0}")]
    Conflict(String),

    /// Route was undeployed; the path is intentionally unavailable
    #[error("mapping undeployed")]
    Gone,

    /// Fixed-window rate limit exceeded for this mapping
    #[error("rate limit exceeded")]
    RateLimited,

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Backing engine failure during statement execution
    #[error("{0}")]
    Execution(String),

    /// Installed route whose backing query/connector vanished
    #[error("{0}")]
    Consistency(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone => StatusCode::GONE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Consistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in the response body and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Auth(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Gone => "GONE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Execution(_) => "EXECUTION_ERROR",
            ApiError::Consistency(_) => "CONSISTENCY_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
    pub request_id: String,
    pub timestamp: String,
}

impl ErrorBody {
    /// Build a body with a fresh request id and current timestamp
    pub fn from_error(err: &ApiError) -> Self {
        Self {
            error_code: err.error_code().to_string(),
            message: err.to_string(),
            request_id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody::from_error(&self);

        // The body is also stashed as an extension so the error-logging
        // middleware can append a durable log record after the fact.
        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(body);
        response
    }
}
