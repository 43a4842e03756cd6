//! Error types for API operations.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the executor, paginator, and uploader.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network level failure from the underlying HTTP client
    #[error("Network request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status with strict mode enabled, or a rate limit that
    /// outlived the single automatic retry
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// A multipart PUT failed; the whole upload has been abandoned
    #[error("Upload of part {part_number} failed: {reason}")]
    PartUpload { part_number: u32, reason: String },

    /// The API answered with a payload we could not make sense of
    #[error("Invalid response from API: {0}")]
    InvalidResponse(String),

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Whether trying the same operation again later could succeed.
    ///
    /// Nothing in this crate retries on this basis; it is offered to callers
    /// that layer their own retry policy on top.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::PartUpload { .. } => true,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }
}
