//! REST error types.

use crate::application::jobs::ProcessError;
use crate::infrastructure::rate_limit::RateLimitError;

/// REST request errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Client construction failed.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Still rate limited after the attempt budget.
    #[error("rate limited after {attempts} attempts")]
    RateLimited {
        /// Attempts made.
        attempts: u32,
    },

    /// 4xx other than 429.
    #[error("request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// 5xx after retries.
    #[error("server error {status} after {attempts} attempts")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// Transport failure or timeout after retries.
    #[error("network error after {attempts} attempts: {message}")]
    Network {
        /// Error detail.
        message: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Rate limiter refused the request.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Response processor failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
}
