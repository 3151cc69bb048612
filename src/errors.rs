//! Service error types.
//!
//! Every variant maps to a stable error code and HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(ServiceError::NotFound { .. })`.
//!
//! Transient infrastructure failures (`StoreUnavailable`,
//! `SecretUnavailable`) map to 5xx so callers can distinguish them from
//! permanent client errors and decide whether to retry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Error kinds surfaced by the image service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested asset does not exist.
    #[error("The requested asset does not exist")]
    NotFound { asset_id: String },

    /// An asset with this identifier already exists.
    #[error("An asset with this identifier already exists")]
    Conflict { asset_id: String },

    /// The presented credential is missing, malformed, or does not match.
    #[error("{message}")]
    Unauthorized { message: String },

    /// A request argument failed validation.
    #[error("{message}")]
    Validation { message: String },

    /// The object store could not be reached or timed out.
    #[error("The object store is unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The secret store could not be reached or timed out.
    #[error("The secret store is unavailable: {message}")]
    SecretUnavailable { message: String },

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound { .. } => "NotFound",
            ServiceError::Conflict { .. } => "Conflict",
            ServiceError::Unauthorized { .. } => "Unauthorized",
            ServiceError::Validation { .. } => "ValidationError",
            ServiceError::StoreUnavailable { .. } => "StoreUnavailable",
            ServiceError::SecretUnavailable { .. } => "SecretUnavailable",
            ServiceError::Internal(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Conflict { .. } => StatusCode::CONFLICT,
            ServiceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServiceError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::SecretUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for an unauthorized error with the given message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ServiceError::Unauthorized {
            message: message.into(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let body = serde_json::json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        })
        .to_string();

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
                ("date", date),
                ("server", "ImageVault".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
