//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - [`PipelineError`] is what the conversion core (fluctuation, engines,
//!   stitching, codecs) reports. It knows nothing about HTTP.
//! - [`AppError`] is what request handlers return. It implements
//!   `ResponseError`, so actix turns it into a JSON error response.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Pattern matching**: The HTTP layer uses `match` to choose a status code
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` turn a `PipelineError` into an `AppError` at the boundary
//! - **Display trait**: Defines how errors are formatted for logs and responses
//! - **std::error::Error**: Lets pipeline errors flow into `anyhow` during startup

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Errors raised by the conversion core.
///
/// ## Severity:
/// - **Config**: invalid parameters, rejected at construction time
/// - **ModelUnavailable**: logged and degraded to demo mode, never returned from `convert`
/// - **ConversionFailure**: malformed buffer or backend failure during a conversion
/// - **Timeout**: the conversion deadline elapsed
/// - **Codec**: audio bytes could not be decoded or written
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Config(String),
    ModelUnavailable(String),
    ConversionFailure(String),
    Timeout(Duration),
    Codec(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            PipelineError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            PipelineError::ConversionFailure(msg) => write!(f, "Conversion failed: {}", msg),
            PipelineError::Timeout(limit) => {
                write!(f, "Conversion exceeded deadline of {} ms", limit.as_millis())
            }
            PipelineError::Codec(msg) => write!(f, "Audio codec error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        PipelineError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Codec(err.to_string())
    }
}

/// Result alias used throughout the conversion core.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **ConversionFailed**: The pipeline could not convert the audio (500 errors)
///
/// ## Usage Example:
/// ```rust
/// use makebeliv_backend::error::AppError;
/// let err = AppError::BadRequest("No audio field in form".to_string());
/// assert!(err.to_string().contains("audio"));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (task panics, I/O failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The conversion core reported a failure the caller must see
    ConversionFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConversionFailed(msg) => write!(f, "Conversion failed: {}", msg),
        }
    }
}

/// Converts application errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError/ConversionFailed → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "No audio field in form",
///     "timestamp": "2026-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::ConfigError(_) | AppError::ConversionFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::ConversionFailed(msg) => ("conversion_failed", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// General-purpose errors from startup plumbing become 500s.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are the client's fault, so they map to 400.
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

/// Maps core failures onto HTTP categories.
///
/// ## Mapping:
/// - Undecodable audio is a client problem (400)
/// - Invalid parameters reaching the core are validation errors (400)
/// - Everything else is a server-side conversion failure (500)
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Codec(msg) => AppError::BadRequest(format!("Unreadable audio: {}", msg)),
            PipelineError::Config(msg) => AppError::ValidationError(msg),
            other => AppError::ConversionFailed(other.to_string()),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
