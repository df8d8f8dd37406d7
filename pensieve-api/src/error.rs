///! Standardized error handling for API responses
///!
///! Provides consistent JSON error responses across all API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Standard API error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,

    /// Error code for programmatic handling
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional detailed error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// API error types with standardized responses
#[derive(Debug)]
pub enum ApiError {
    /// 500 Internal Server Error
    Internal(String),

    /// 404 Not Found
    NotFound(String),

    /// 403 Forbidden
    Forbidden(String),

    /// 400 Bad Request
    BadRequest(String),

    /// 422 Unprocessable Entity
    ValidationError(String),

    /// 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Convert error to ErrorResponse
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::Internal(msg) => {
                error!("Internal API error: {}", msg);
                ErrorResponse::new(500, "INTERNAL_ERROR", "An internal server error occurred")
                    .with_details(msg)
            }
            ApiError::NotFound(msg) => ErrorResponse::new(404, "NOT_FOUND", msg),
            ApiError::Forbidden(msg) => ErrorResponse::new(403, "FORBIDDEN", msg),
            ApiError::BadRequest(msg) => ErrorResponse::new(400, "BAD_REQUEST", msg),
            ApiError::ValidationError(msg) => ErrorResponse::new(422, "VALIDATION_ERROR", msg),
            ApiError::ServiceUnavailable(msg) => {
                ErrorResponse::new(503, "SERVICE_UNAVAILABLE", msg)
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_error_response());
        (status, body).into_response()
    }
}

impl From<pensieve_common::Error> for ApiError {
    fn from(err: pensieve_common::Error) -> Self {
        use pensieve_common::Error;

        match err {
            Error::Validation(msg) => ApiError::ValidationError(msg),
            Error::PermissionDenied(msg) => ApiError::Forbidden(msg),
            Error::Execution(msg) => ApiError::Internal(msg),
            Error::Persistence(msg) => ApiError::Internal(msg),
            Error::System(msg) => ApiError::Internal(msg),
            Error::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}
