//! # Error Handling
//!
//! Every handler returns `AppResult<T>`. When a handler fails, actix-web calls
//! [`ResponseError::error_response`] on the error, which turns it into a JSON
//! body game clients can show to players:
//!
//! ```json
//! { "error": "Level 'Level1' not found" }
//! ```
//!
//! ## Error Categories:
//! - **BadRequest**: the client sent something unusable (400)
//! - **NotFound**: the level or audio file does not exist (404)
//! - **PayloadTooLarge**: the audio file is over the configured cap (413)
//! - **RateLimited**: the client hit a request ceiling (429)
//! - **Internal**: disk or serialization failures on our side (500)
//!
//! Lower layers (storage, config) use `anyhow` and are converted into
//! `Internal` with `?`.

use crate::rate_limit::RateLimitExceeded;
use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use tracing::error;

#[derive(Debug)]
pub enum AppError {
    /// Server-side failures (disk I/O, corrupt metadata file, etc.)
    Internal(String),

    /// Client sent missing or malformed form data
    BadRequest(String),

    /// Requested level or audio file does not exist
    NotFound(String),

    /// Uploaded file exceeds the configured size cap
    PayloadTooLarge(String),

    /// Client exceeded a rate-limit ceiling
    RateLimited {
        /// Description of the ceiling, e.g. "10 per 1 hour"
        message: String,
        retry_after_secs: u64,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::RateLimited { message, .. } => write!(f, "Rate limit exceeded: {}", message),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// ## Response bodies:
    /// - client errors: `{"error": "<message>"}`
    /// - internal errors: `{"error": "Internal server error"}`
    /// - rate limits: `{"error": "Rate limit exceeded", "message": "<limit>"}`
    ///   plus a `Retry-After` header in seconds
    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());

        match self {
            AppError::RateLimited {
                message,
                retry_after_secs,
            } => response
                .insert_header((header::RETRY_AFTER, retry_after_secs.to_string()))
                .json(json!({
                    "error": "Rate limit exceeded",
                    "message": message
                })),
            // The detail can carry filesystem paths; it goes to the log only.
            AppError::Internal(msg) => {
                error!(error = %msg, "Request failed with internal error");
                response.json(json!({ "error": "Internal server error" }))
            }
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::PayloadTooLarge(msg) => response.json(json!({ "error": msg })),
        }
    }
}

/// Storage and config code report failures through `anyhow`; anything that
/// reaches a handler that way is our fault, not the client's.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<RateLimitExceeded> for AppError {
    fn from(err: RateLimitExceeded) -> Self {
        AppError::RateLimited {
            message: err.limit.to_string(),
            // Round up so clients never retry a moment too early.
            retry_after_secs: err.retry_after.as_secs() + 1,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
