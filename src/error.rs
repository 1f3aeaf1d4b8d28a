//! # Error Handling
//!
//! Error types for the voice session service and their HTTP representation.
//!
//! ## Error Taxonomy:
//! - **Permission**: the capture source (microphone) could not be acquired.
//!   Terminal for the attempted session, never retried automatically.
//! - **Connection**: the realtime channel could not be established or was lost.
//!   No automatic reconnect; the user starts a new chat.
//! - **Decode**: a malformed inbound audio frame. Skipped by the session, it
//!   never ends an otherwise healthy conversation.
//! - **InvalidState**: an operation was requested from a lifecycle state that
//!   does not allow it (e.g. `start()` while a chat is running).
//!
//! The remaining variants cover the HTTP control surface and configuration.
//!
//! ## Propagation Policy:
//! Session operations catch failures at their own boundary and turn them into a
//! status line. The HTTP layer converts whatever reaches it through
//! `ResponseError`, so nothing ever escapes as an unhandled fault.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Permission("microphone access denied".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Capture source (microphone) access denied or unavailable
    Permission(String),

    /// Realtime channel could not be opened or failed mid-session
    Connection(String),

    /// Inbound payload could not be decoded into audio
    Decode(String),

    /// Operation not valid in the current session state
    InvalidState(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Anything else that went wrong inside the service
    Internal(String),
}

impl AppError {
    /// Machine-readable error type used in JSON responses and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Permission(_) => "permission_error",
            AppError::Connection(_) => "connection_error",
            AppError::Decode(_) => "decode_error",
            AppError::InvalidState(_) => "invalid_state",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::Permission(msg)
            | AppError::Connection(msg)
            | AppError::Decode(msg)
            | AppError::InvalidState(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Permission(msg) => write!(f, "Permission denied: {}", msg),
            AppError::Connection(msg) => write!(f, "Connection error: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Permission → 403 (the user has to grant microphone access)
/// - Connection → 502 (the upstream voice endpoint failed)
/// - InvalidState → 409 (e.g. a chat is already running)
/// - BadRequest/ValidationError/Decode → 400
/// - NotFound → 404
/// - Internal/ConfigError → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "permission_error",
///     "message": "microphone access denied",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) | AppError::ValidationError(_) | AppError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConfigError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `anyhow` errors from startup and configuration code become internal errors.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            AppError::Permission("denied".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Connection("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::InvalidState("busy".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ValidationError("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_display_keeps_message() {
        let err = AppError::Decode("odd byte length".to_string());
        assert_eq!(err.to_string(), "Decode error: odd byte length");
        assert_eq!(err.message(), "odd byte length");
        assert_eq!(err.kind(), "decode_error");
    }

    #[test]
    fn test_json_error_becomes_bad_request() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: AppError = parse_err.into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
