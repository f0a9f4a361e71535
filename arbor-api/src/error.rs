//! API Error Types
//!
//! Every handler returns `ApiResult<T>`; failures serialize as
//! `{code, message, details?}` with an HTTP status derived from the code.

use arbor_core::{ArborError, LlmError, PermissionError, StorageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication / authorization
    Unauthorized,
    Forbidden,

    // Validation
    InvalidInput,
    InvalidFormat,

    // Not found
    EntityNotFound,

    // Server
    InternalError,
    ServiceUnavailable,
    Timeout,
}

impl ErrorCode {
    /// HTTP status and fallback message for this code.
    fn describe(self) -> (StatusCode, &'static str) {
        use ErrorCode::*;
        match self {
            Unauthorized => (StatusCode::UNAUTHORIZED, "Missing or invalid user identity"),
            Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            InvalidInput => (StatusCode::BAD_REQUEST, "Invalid input data"),
            InvalidFormat => (StatusCode::BAD_REQUEST, "Invalid format"),
            EntityNotFound => (StatusCode::NOT_FOUND, "Entity not found"),
            InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "Model or permission backend unavailable"),
            Timeout => (StatusCode::GATEWAY_TIMEOUT, "Planning exceeded its time budget"),
        }
    }

    pub fn status_code(self) -> StatusCode {
        self.describe().0
    }

    pub fn default_message(self) -> &'static str {
        self.describe().1
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// `field` did not parse; `expected` names the accepted shape.
    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(ErrorCode::InvalidFormat, format!("{field}: expected {expected}"))
            .with_details(serde_json::json!({ "field": field }))
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::EntityNotFound, format!("{entity_type} {id} does not exist"))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn timeout(stage: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("{stage} timed out"))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status_code(), Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ArborError> for ApiError {
    fn from(err: ArborError) -> Self {
        match err {
            ArborError::Permission(PermissionError::Denied { .. }) => {
                ApiError::forbidden(err.to_string())
            }
            ArborError::Permission(PermissionError::Unavailable { reason }) => {
                tracing::warn!(%reason, "Permission service unavailable");
                ApiError::service_unavailable("Permission service unavailable")
            }
            ArborError::Storage(StorageError::NotFound { entity_type, id }) => {
                ApiError::entity_not_found(&entity_type.to_string(), id)
            }
            ArborError::Validation(e) => ApiError::invalid_input(e.to_string()),
            ArborError::Llm(LlmError::Timeout { .. }) => ApiError::timeout("model call"),
            ArborError::Llm(
                e @ (LlmError::ProviderNotConfigured
                | LlmError::RequestFailed { .. }
                | LlmError::RateLimited { .. }),
            ) => {
                tracing::warn!(error = %e, "Model provider unavailable");
                ApiError::service_unavailable(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "Unhandled error");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", "UUID").with_details(serde_json::json!({
            "field": "id",
            "reason": err.to_string(),
        }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
