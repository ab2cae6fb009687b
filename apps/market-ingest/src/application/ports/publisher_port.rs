//! Publisher Port (Driven Port)
//!
//! Interface for fanning normalized events and price bars out to downstream
//! consumers (latest-value snapshots, capped append-only logs, live
//! subscribers).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::bars::PriceBar;
use crate::domain::events::NormalizedEvent;

/// Publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Sink unreachable.
    #[error("publisher connection error: {message}")]
    Connection {
        /// Error detail.
        message: String,
    },

    /// Serialization error.
    #[error("publisher serialization error: {message}")]
    Serialization {
        /// Error detail.
        message: String,
    },

    /// Publisher already closed.
    #[error("publisher is closed")]
    Closed,
}

/// Port for fan-out writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a normalized event.
    async fn publish_event(&self, event: &NormalizedEvent) -> Result<(), PublishError>;

    /// Publish a one-minute price bar (completed or in progress).
    async fn publish_bar(&self, bar: &PriceBar) -> Result<(), PublishError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), PublishError>;
}

/// Shared publisher handle.
pub type SharedPublisher = Arc<dyn Publisher>;
