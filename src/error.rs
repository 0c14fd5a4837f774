//! # Error Handling
//!
//! Application error type and its mapping to HTTP responses.
//!
//! ## Two Layers of Errors:
//! - **anyhow::Result**: Used inside the relay. Adapters and the dispatcher
//!   attach context with `.context(...)` as errors bubble up, and a session
//!   that fails just ends with the whole chain logged.
//! - **AppError**: Used where an error crosses the HTTP boundary, which is
//!   configuration at startup and refused WebSocket upgrades.
//!
//! ## Key Rust Concepts:
//!
//! ### The `?` Operator
//! - **Purpose**: Return early with the error if a `Result` is `Err`
//! - **Conversion**: `?` calls `From::from` on the error, so an
//!   `anyhow::Error` or `config::ConfigError` becomes an `AppError` for free
//!   once the matching `From` impl exists
//!
//! ### ResponseError
//! - Actix calls `status_code` and `error_response` when a handler returns
//!   `Err(AppError)`, so handlers never build error bodies by hand
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "unavailable",
//!     "message": "Maximum concurrent sessions (64) reached",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors that can reach an HTTP client or abort startup.
///
/// ## Rust Concepts:
/// - **enum with data**: Every variant carries its own message
/// - **#[derive(Debug)]**: Needed by `std::error::Error` and by `main`
///   returning `anyhow::Result`
///
/// ## Status Codes:
/// - **Internal**, **ConfigError**: 500
/// - **ValidationError**: 400
/// - **Unavailable**: 503, sent when the session limit is reached
#[derive(Debug)]
pub enum AppError {
    /// Unexpected server-side failure
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Configuration values that parse but make no sense
    ValidationError(String),

    /// The relay is at capacity and cannot accept another session
    Unavailable(String),
}

impl AppError {
    /// Machine-readable `type` field of the JSON body.
    fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Unavailable(_) => "unavailable",
        }
    }

    /// The message without the category prefix that `Display` adds.
    ///
    /// ## Rust Concepts:
    /// - **Or-patterns**: `A(msg) | B(msg)` binds `msg` in every alternative,
    ///   which works because all variants hold the same type
    /// - **Lifetime elision**: The returned `&str` borrows from `self`
    fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg)
            | AppError::Unavailable(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

// Display plus Debug is all std::error::Error needs.
impl std::error::Error for AppError {}

/// Turns an `AppError` into an HTTP response.
///
/// ## What this does:
/// 1. Picks the status code for the variant
/// 2. Wraps the kind and message in the JSON envelope shown above
/// 3. Stamps the body with the current UTC time
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
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

/// Anything that went wrong without a more specific category.
///
/// `{:#}` keeps the whole context chain on one line, for example
/// `failed to bind 0.0.0.0:8080: Address in use`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand used by fallible functions at the HTTP boundary.
pub type AppResult<T> = Result<T, AppError>;
