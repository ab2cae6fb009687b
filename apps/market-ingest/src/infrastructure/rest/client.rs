//! Bearer-authenticated HTTP client with retry classification.
//!
//! Every attempt, retries included, first takes its token cost from the
//! shared [`TokenBucket`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::RestError;
use crate::application::jobs::RequestSpec;
use crate::infrastructure::rate_limit::TokenBucket;

const MAX_ERROR_BODY: usize = 200;

/// Retry budget for REST requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First wait after a 429 without a Retry-After header.
    pub rate_limit_backoff: Duration,
    /// Ceiling for 429 waits.
    pub rate_limit_backoff_max: Duration,
    /// Total attempts while rate limited.
    pub rate_limit_max_attempts: u32,
    /// Retries after a 5xx, 408 or transport error.
    pub server_error_retries: u32,
    /// Fixed wait between those retries.
    pub server_error_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(10),
            rate_limit_backoff_max: Duration::from_secs(120),
            rate_limit_max_attempts: 3,
            server_error_retries: 2,
            server_error_backoff: Duration::from_secs(1),
        }
    }
}

/// Error category for determining retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 429.
    RateLimited,
    /// 408 and 5xx.
    Retryable,
    /// Any other non-success status.
    NonRetryable,
}

/// Categorize an HTTP status code for retry handling.
#[must_use]
pub const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    // Negative, non-finite and out-of-range values are treated as absent.
    Duration::try_from_secs_f64(secs).ok()
}

/// HTTP client for the market-data REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    token: String,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl RestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Client`] if the token is empty or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        limiter: Arc<TokenBucket>,
        retry: RetryPolicy,
    ) -> Result<Self, RestError> {
        if token.is_empty() {
            return Err(RestError::Client("API token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            limiter,
            retry,
        })
    }

    /// Shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    /// Execute a request and decode its JSON body.
    ///
    /// An empty body decodes to `null`.
    ///
    /// # Errors
    ///
    /// Returns the [`RestError`] for the failure class once its retry budget
    /// is spent.
    pub async fn fetch(&self, spec: &RequestSpec) -> Result<Value, RestError> {
        let url = format!("{}{}", self.base_url, spec.path);
        let mut rate_limited = 0_u32;
        let mut rate_limit_delay = self.retry.rate_limit_backoff;
        let mut failures = 0_u32;

        loop {
            self.limiter.acquire(f64::from(spec.tokens)).await?;

            let sent = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/json")
                .query(&spec.params)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    failures += 1;
                    if failures > self.retry.server_error_retries {
                        return Err(RestError::Network {
                            message: e.to_string(),
                            attempts: failures,
                        });
                    }
                    tracing::warn!(
                        request = %spec.name,
                        error = %e,
                        attempt = failures,
                        delay_ms = self.retry.server_error_backoff.as_millis(),
                        "Network error, retrying"
                    );
                    tokio::time::sleep(self.retry.server_error_backoff).await;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| RestError::Decode(e.to_string()))?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    rate_limited += 1;
                    if rate_limited >= self.retry.rate_limit_max_attempts {
                        return Err(RestError::RateLimited {
                            attempts: rate_limited,
                        });
                    }
                    let delay = retry_after
                        .unwrap_or(rate_limit_delay)
                        .min(self.retry.rate_limit_backoff_max);
                    tracing::warn!(
                        request = %spec.name,
                        attempt = rate_limited,
                        delay_ms = delay.as_millis(),
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    rate_limit_delay = rate_limit_delay
                        .saturating_mul(2)
                        .min(self.retry.rate_limit_backoff_max);
                }
                ErrorCategory::Retryable => {
                    failures += 1;
                    if failures > self.retry.server_error_retries {
                        return Err(RestError::Server {
                            status: status.as_u16(),
                            attempts: failures,
                        });
                    }
                    tracing::warn!(
                        request = %spec.name,
                        status = status.as_u16(),
                        attempt = failures,
                        delay_ms = self.retry.server_error_backoff.as_millis(),
                        "Server error, retrying"
                    );
                    tokio::time::sleep(self.retry.server_error_backoff).await;
                }
                ErrorCategory::NonRetryable => {
                    let mut body = response.text().await.unwrap_or_default();
                    if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
                        body.truncate(idx);
                    }
                    return Err(RestError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(429, ErrorCategory::RateLimited)]
    #[test_case(408, ErrorCategory::Retryable)]
    #[test_case(500, ErrorCategory::Retryable)]
    #[test_case(503, ErrorCategory::Retryable)]
    #[test_case(400, ErrorCategory::NonRetryable)]
    #[test_case(401, ErrorCategory::NonRetryable)]
    #[test_case(404, ErrorCategory::NonRetryable)]
    fn categorize(code: u16, expected: ErrorCategory) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(categorize_status(status), expected);
    }

    #[test_case("5", Some(Duration::from_secs(5)))]
    #[test_case(" 1.5 ", Some(Duration::from_millis(1500)))]
    #[test_case("-1", None)]
    #[test_case("1e20", None)]
    #[test_case("inf", None)]
    #[test_case("NaN", None)]
    #[test_case("Wed, 21 Oct 2015 07:28:00 GMT", None)]
    fn retry_after(value: &str, expected: Option<Duration>) {
        assert_eq!(parse_retry_after(value), expected);
    }

    #[test]
    fn empty_token_is_rejected() {
        let limiter = Arc::new(TokenBucket::new(1.0, 1.0).unwrap());
        let err = RestClient::new(
            "https://example.invalid",
            "",
            Duration::from_secs(1),
            limiter,
            RetryPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RestError::Client(_)));
    }
}
