//! Error handling module for the ZipShip service.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_ARCHIVE: &str = "INVALID_ARCHIVE";
    pub const IDENTITY_NOT_CONNECTED: &str = "IDENTITY_NOT_CONNECTED";
    pub const CREDIT_EXHAUSTED: &str = "CREDIT_EXHAUSTED";
    pub const REMOTE_SYNC_FAILURE: &str = "REMOTE_SYNC_FAILURE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Caller is authenticated but not allowed
    Forbidden(String),
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Upload is not a parseable archive or holds no usable files
    InvalidArchive(String),
    /// No remote credential stored for the user
    IdentityNotConnected(String),
    /// No remaining deploy credit and no unlimited grant
    CreditExhausted(String),
    /// Repository API failure during synchronization
    RemoteSync(String),
    /// Database error
    Database(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidArchive(_) => StatusCode::BAD_REQUEST,
            AppError::IdentityNotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CreditExhausted(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::RemoteSync(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::Forbidden(_) => codes::FORBIDDEN,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::InvalidArchive(_) => codes::INVALID_ARCHIVE,
            AppError::IdentityNotConnected(_) => codes::IDENTITY_NOT_CONNECTED,
            AppError::CreditExhausted(_) => codes::CREDIT_EXHAUSTED,
            AppError::RemoteSync(_) => codes::REMOTE_SYNC_FAILURE,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::InvalidArchive(msg)
            | AppError::IdentityNotConnected(msg)
            | AppError::CreditExhausted(msg)
            | AppError::RemoteSync(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        tracing::error!("Remote API error: {}", err);
        AppError::RemoteSync(err.to_string())
    }
}

/// Failure reported by a remote collaborator (repository API, text generation).
///
/// `NotFound` is kept apart from every other failure because repository
/// resolution branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    NotFound(String),
    Api { status: u16, message: String },
    Transport(String),
    /// No response arrived in time; the request may still have taken effect.
    Timeout(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_))
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::NotFound(what) => write!(f, "not found: {}", what),
            RemoteError::Api { status, message } => write!(f, "HTTP {}: {}", status, message),
            RemoteError::Transport(msg) => write!(f, "transport error: {}", msg),
            RemoteError::Timeout(msg) => write!(f, "timed out: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RemoteError::Timeout(err.to_string());
        }
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
                RemoteError::NotFound(err.to_string())
            }
            Some(status) => RemoteError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => RemoteError::Transport(err.to_string()),
        }
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
