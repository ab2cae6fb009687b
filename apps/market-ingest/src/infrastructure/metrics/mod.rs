//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames received and dropped, reconnects, connection state
//! - **Handlers**: events persisted, buffer flushes, handler failures
//! - **REST**: requests by job and outcome, rate limiter waits and tokens
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::events::FeedKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "market_ingest_frames_received_total",
        "Total frames received from the streaming socket by channel"
    );
    describe_counter!(
        "market_ingest_frames_dropped_total",
        "Total frames dropped before reaching a handler, by reason"
    );
    describe_counter!(
        "market_ingest_stream_reconnects_total",
        "Total streaming reconnection attempts"
    );
    describe_gauge!(
        "market_ingest_stream_connected",
        "1 while the streaming socket is subscribed, 0 otherwise"
    );

    // Handlers
    describe_counter!(
        "market_ingest_handler_errors_total",
        "Total handler failures by channel"
    );
    describe_counter!(
        "market_ingest_events_persisted_total",
        "Total normalized events written to the repository by feed"
    );
    describe_counter!(
        "market_ingest_events_published_total",
        "Total normalized events handed to the publisher by feed"
    );
    describe_histogram!(
        "market_ingest_buffer_flush_size",
        "Number of events per buffered handler flush"
    );

    // REST
    describe_counter!(
        "market_ingest_rest_requests_total",
        "Total REST requests by job and outcome"
    );
    describe_histogram!(
        "market_ingest_rate_limit_wait_seconds",
        "Time spent waiting for rate limiter tokens"
    );
    describe_gauge!(
        "market_ingest_rate_limit_tokens",
        "Tokens available in the REST rate limiter"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a frame never reaches a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not JSON, or an unsupported shape.
    Malformed,
    /// No channel identifier.
    MissingChannel,
    /// Channel present but no payload.
    MissingPayload,
    /// No handler registered for the channel.
    UnknownChannel,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingChannel => "missing_channel",
            Self::MissingPayload => "missing_payload",
            Self::UnknownChannel => "unknown_channel",
        }
    }
}

/// REST request outcome labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestOutcome {
    /// Response processed.
    Success,
    /// 429 after the retry budget.
    RateLimited,
    /// Non-retryable 4xx.
    ClientError,
    /// 5xx after retries.
    ServerError,
    /// Transport failure after retries.
    NetworkError,
    /// Body was not JSON.
    DecodeError,
    /// Response processor failed.
    ProcessorError,
}

impl RestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::DecodeError => "decode_error",
            Self::ProcessorError => "processor_error",
        }
    }
}

/// Record a frame received on a channel.
pub fn record_frame_received(channel: &str) {
    counter!(
        "market_ingest_frames_received_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a frame dropped before dispatch.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "market_ingest_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a streaming reconnection attempt.
pub fn record_reconnect() {
    counter!("market_ingest_stream_reconnects_total").increment(1);
}

/// Update the streaming connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("market_ingest_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a handler failure.
pub fn record_handler_error(channel: &str) {
    counter!(
        "market_ingest_handler_errors_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record events written to the repository.
pub fn record_events_persisted(kind: FeedKind, count: u64) {
    counter!(
        "market_ingest_events_persisted_total",
        "feed" => kind.as_str()
    )
    .increment(count);
}

/// Record events fanned out by the publisher.
pub fn record_events_published(kind: FeedKind, count: u64) {
    counter!(
        "market_ingest_events_published_total",
        "feed" => kind.as_str()
    )
    .increment(count);
}

/// Record a buffered handler flush.
#[allow(clippy::cast_precision_loss)]
pub fn record_buffer_flush(channel: &str, size: usize) {
    histogram!(
        "market_ingest_buffer_flush_size",
        "channel" => channel.to_string()
    )
    .record(size as f64);
}

/// Record a REST request outcome.
pub fn record_rest_request(job: &str, outcome: RestOutcome) {
    counter!(
        "market_ingest_rest_requests_total",
        "job" => job.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record time spent waiting on the rate limiter.
pub fn record_rate_limit_wait(wait: Duration) {
    histogram!("market_ingest_rate_limit_wait_seconds").record(wait.as_secs_f64());
}

/// Update the available-token gauge.
pub fn set_rate_limit_tokens(tokens: f64) {
    gauge!("market_ingest_rate_limit_tokens").set(tokens);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::Malformed.as_str(), "malformed");
        assert_eq!(DropReason::MissingChannel.as_str(), "missing_channel");
        assert_eq!(DropReason::MissingPayload.as_str(), "missing_payload");
        assert_eq!(DropReason::UnknownChannel.as_str(), "unknown_channel");
    }

    #[test]
    fn rest_outcome_as_str() {
        assert_eq!(RestOutcome::Success.as_str(), "success");
        assert_eq!(RestOutcome::RateLimited.as_str(), "rate_limited");
        assert_eq!(RestOutcome::ClientError.as_str(), "client_error");
        assert_eq!(RestOutcome::ServerError.as_str(), "server_error");
        assert_eq!(RestOutcome::NetworkError.as_str(), "network_error");
        assert_eq!(RestOutcome::DecodeError.as_str(), "decode_error");
        assert_eq!(RestOutcome::ProcessorError.as_str(), "processor_error");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_frame_received("price");
        record_frame_dropped(DropReason::UnknownChannel);
        record_rest_request("stock_nope", RestOutcome::Success);
        record_rate_limit_wait(Duration::from_millis(5));
    }
}
