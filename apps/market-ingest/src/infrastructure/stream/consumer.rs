//! Streaming Consumer
//!
//! Owns the WebSocket connection lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Streaming
//!                    ↑                         │ close / error / timeout
//!                    └────── Reconnecting ←────┘
//! ```
//!
//! After every connect one subscription message is sent per registered
//! handler. Frames are dispatched in arrival order to every handler
//! registered for their channel; a failing or panicking handler is logged
//! and does not affect its siblings or the read loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FrameCodec};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{ConnectionState, StreamStatus};
use super::watchdog::{ActivityWatchdog, Expiry};
use crate::application::handlers::HandlerRegistry;
use crate::application::service::IngestLoop;
use crate::infrastructure::metrics::{self, DropReason};

/// Far-future stand-in for a disarmed timer.
const DISARMED: Duration = Duration::from_secs(365 * 24 * 3600);

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a streaming session ended.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Subscription could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// No data frame within the inactivity timeout.
    #[error("no data received for {0:?}")]
    Inactive(Duration),

    /// No pong within the pong timeout.
    #[error("no pong received within {0:?}")]
    PongTimeout(Duration),
}

impl From<Expiry> for StreamError {
    fn from(expiry: Expiry) -> Self {
        match expiry {
            Expiry::Inactivity(timeout) => Self::Inactive(timeout),
            Expiry::Pong(timeout) => Self::PongTimeout(timeout),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the streaming consumer.
#[derive(Clone)]
pub struct StreamConfig {
    /// WebSocket URL without the token.
    pub url: String,
    /// API token, sent as the `token` query parameter.
    pub token: String,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Session ends when no data frame arrives for this long (0 = never).
    pub inactivity_timeout: Duration,
    /// Interval between keep-alive pings (0 = no pings).
    pub ping_interval: Duration,
    /// Session ends when a ping goes unanswered for this long.
    pub ping_timeout: Duration,
}

impl StreamConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect: ReconnectConfig::default(),
            inactivity_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
        }
    }

    /// URL with the token appended as a query parameter.
    #[must_use]
    pub fn authenticated_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={}", self.url, self.token)
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("reconnect", &self.reconnect)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// WebSocket consumer dispatching frames to channel handlers.
#[derive(Debug)]
pub struct StreamConsumer {
    config: StreamConfig,
    registry: HandlerRegistry,
    codec: FrameCodec,
    status: Arc<StreamStatus>,
}

impl StreamConsumer {
    /// Create a consumer.
    #[must_use]
    pub fn new(config: StreamConfig, registry: HandlerRegistry) -> Self {
        Self {
            config,
            registry,
            codec: FrameCodec::new(),
            status: Arc::new(StreamStatus::new()),
        }
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Handlers this consumer dispatches to.
    #[must_use]
    pub const fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Connect, stream and reconnect until `cancel` fires.
    ///
    /// Recoverable failures never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        while !cancel.is_cancelled() {
            let mut streamed = false;
            match self.connect_and_run(&cancel, &mut streamed).await {
                Ok(()) => break,
                Err(e) => tracing::warn!(error = %e, streamed, "Streaming session ended"),
            }

            if streamed {
                policy.reset();
            }
            let delay = policy.next_delay();
            self.status.set_state(ConnectionState::Reconnecting);
            self.status.record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to stream"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Streaming consumer stopped");
    }

    /// One session. `Ok(())` only on cancellation.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        streamed: &mut bool,
    ) -> Result<(), StreamError> {
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to stream");

        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.authenticated_url()) => connected,
        };
        let (ws_stream, _response) = connected?;
        let (mut write, mut read) = ws_stream.split();

        for subscription in self.registry.subscriptions() {
            let json = self.codec.encode_subscription(subscription)?;
            tracing::debug!(channel = %subscription.channel, tickers = ?subscription.tickers, "Subscribing");
            write.send(Message::Text(json.into())).await?;
        }
        self.status.set_state(ConnectionState::Subscribed);
        tracing::info!(subscriptions = self.registry.len(), "Stream subscribed");

        let mut watchdog = ActivityWatchdog::new(self.config.inactivity_timeout, self.config.ping_timeout);
        let pinging = !self.config.ping_interval.is_zero();
        let ping_period = if pinging { self.config.ping_interval } else { DISARMED };
        let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);

        loop {
            let deadline = watchdog.deadline();
            let timer = tokio::time::sleep_until(deadline.unwrap_or_else(|| Instant::now() + DISARMED));

            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick(), if pinging => {
                    watchdog.mark_ping_sent();
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                () = timer, if deadline.is_some() => {
                    if let Some(expiry) = watchdog.expired(Instant::now()) {
                        return Err(expiry.into());
                    }
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                watchdog.record_activity();
                                self.status.record_drop();
                                metrics::record_frame_dropped(DropReason::Malformed);
                                tracing::warn!("Dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            watchdog.record_pong();
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::ConnectionClosed),
                    };

                    watchdog.record_activity();
                    if !*streamed {
                        *streamed = true;
                        self.status.set_state(ConnectionState::Streaming);
                    }
                    self.dispatch(&text).await;
                }
            }
        }
    }

    /// Decode a frame and hand each payload to every handler registered for
    /// its channel, in registration order.
    ///
    /// A `base:SUFFIX` channel with no exact registration falls back to
    /// `base`, with `SUFFIX` supplied as the payload's ticker when absent.
    /// Returns the number of handler invocations.
    pub async fn dispatch(&self, text: &str) -> usize {
        self.status.record_frame();

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                let reason = match e {
                    CodecError::MissingChannel => DropReason::MissingChannel,
                    CodecError::MissingPayload(_) => DropReason::MissingPayload,
                    CodecError::Json(_) | CodecError::InvalidFormat(_) => DropReason::Malformed,
                };
                self.status.record_drop();
                metrics::record_frame_dropped(reason);
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return 0;
            }
        };
        metrics::record_frame_received(&frame.channel);

        let mut handlers = self.registry.handlers_for(&frame.channel);
        let mut injected_ticker = None;
        if handlers.is_empty()
            && let (base, Some(suffix)) = frame.split_channel()
        {
            handlers = self.registry.handlers_for(base);
            injected_ticker = Some(suffix.to_uppercase());
        }

        if handlers.is_empty() {
            self.status.record_drop();
            metrics::record_frame_dropped(DropReason::UnknownChannel);
            tracing::debug!(channel = %frame.channel, "No handler registered for channel");
            return 0;
        }

        let mut invoked = 0;
        for mut payload in frame.payloads {
            if let Some(ticker) = &injected_ticker
                && payload.get("ticker").is_none_or(Value::is_null)
            {
                payload.insert("ticker".to_string(), Value::String(ticker.clone()));
            }

            for handler in handlers {
                invoked += 1;
                let outcome = AssertUnwindSafe(handler.handle(payload.clone()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(result)) => {
                        tracing::trace!(channel = %handler.channel(), ?result, "Handled payload");
                    }
                    Ok(Err(e)) => {
                        metrics::record_handler_error(handler.channel());
                        tracing::error!(channel = %handler.channel(), error = %e, "Handler failed");
                    }
                    Err(_) => {
                        metrics::record_handler_error(handler.channel());
                        tracing::error!(channel = %handler.channel(), "Handler panicked");
                    }
                }
            }
        }
        invoked
    }
}

#[async_trait]
impl IngestLoop for StreamConsumer {
    fn name(&self) -> &'static str {
        "stream_consumer"
    }

    async fn run_until_cancelled(self: Box<Self>, cancel: CancellationToken) {
        self.run(cancel).await;
    }
}
