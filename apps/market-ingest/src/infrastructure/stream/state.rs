//! Connection state shared between the consumer loop and the health server.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::infrastructure::metrics;

/// Streaming connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none pending.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Subscriptions sent, no data yet.
    Subscribed,
    /// Data flowing.
    Streaming,
    /// Waiting out a backoff delay.
    Reconnecting,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Subscribed,
            3 => Self::Streaming,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Subscribed => 2,
            Self::Streaming => 3,
            Self::Reconnecting => 4,
        }
    }

    /// Whether the socket is open and subscribed.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Subscribed | Self::Streaming)
    }
}

/// Lock-free connection status and counters.
#[derive(Debug, Default)]
pub struct StreamStatus {
    state: AtomicU8,
    reconnect_attempts: AtomicU64,
    sessions: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    last_frame_ms: AtomicI64,
}

/// Point-in-time copy of [`StreamStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts since start.
    pub reconnect_attempts: u64,
    /// Connections that reached the subscribed state.
    pub sessions: u64,
    /// Text frames received.
    pub frames_received: u64,
    /// Frames dropped before dispatch.
    pub frames_dropped: u64,
    /// Wall-clock time of the last frame.
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl StreamStatus {
    /// Create a disconnected status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to a new state.
    pub fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Stream state changed");
            if state == ConnectionState::Subscribed {
                self.sessions.fetch_add(1, Ordering::Relaxed);
            }
            metrics::set_stream_connected(state.is_connected());
        }
    }

    /// Count a reconnect attempt.
    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
    }

    /// Count a received frame.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_frame_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Count a dropped frame.
    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        let last = self.last_frame_ms.load(Ordering::Relaxed);
        StreamSnapshot {
            state: self.state(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            last_frame_at: (last > 0)
                .then(|| DateTime::from_timestamp_millis(last))
                .flatten(),
        }
    }
}
