//! Channel Handlers
//!
//! One handler per logical streaming feed. A handler declares the channel it
//! subscribes to (optionally narrowed to a ticker set), turns each payload
//! into a normalized event and forwards it to the repository and publisher,
//! either immediately or through a size/interval-bounded buffer.
//!
//! | Channel             | Handler                | Discipline            |
//! |---------------------|------------------------|-----------------------|
//! | `flow-alerts`       | [`ImmediateHandler`]   | immediate             |
//! | `price`             | [`PriceHandler`]       | immediate + 1m bars   |
//! | `option_trades`     | [`BufferedHandler`]    | buffered              |
//! | `gex`               | [`ImmediateHandler`]   | immediate             |
//! | `gex_strike`        | [`ImmediateHandler`]   | immediate             |
//! | `gex_strike_expiry` | [`ImmediateHandler`]   | immediate             |
//! | `news`              | [`ImmediateHandler`]   | immediate             |

mod buffered;
mod immediate;
mod price;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::application::ports::{PublishError, RepositoryError, SharedPublisher, SharedRepository};
use crate::domain::normalize::{NormalizeError, Payload};

pub use buffered::{BufferedHandler, FlushPolicy};
pub use immediate::ImmediateHandler;
pub use price::PriceHandler;
pub use registry::HandlerRegistry;

/// Channel names used on the streaming socket.
pub mod channels {
    /// Flow alerts.
    pub const FLOW_ALERTS: &str = "flow-alerts";
    /// Underlying price ticks.
    pub const PRICE: &str = "price";
    /// Option prints.
    pub const OPTION_TRADES: &str = "option_trades";
    /// Aggregate gamma exposure.
    pub const GEX: &str = "gex";
    /// Gamma exposure by strike.
    pub const GEX_STRIKE: &str = "gex_strike";
    /// Gamma exposure by strike and expiry.
    pub const GEX_STRIKE_EXPIRY: &str = "gex_strike_expiry";
    /// News headlines.
    pub const NEWS: &str = "news";
}

// =============================================================================
// Subscription
// =============================================================================

/// Subscription request sent for a handler after every connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    action: &'static str,
    /// Channel name.
    pub channel: String,
    /// Accepted tickers, sorted; `None` accepts every ticker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tickers: Option<Vec<String>>,
}

impl Subscription {
    /// Subscribe to every ticker on a channel.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            action: "subscribe",
            channel: channel.into(),
            tickers: None,
        }
    }

    /// Narrow the subscription to a ticker set (upper-cased, sorted, deduplicated).
    ///
    /// An empty set leaves the subscription unfiltered.
    #[must_use]
    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tickers: Vec<String> = tickers
            .into_iter()
            .map(|t| t.as_ref().trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        tickers.sort();
        tickers.dedup();
        self.tickers = (!tickers.is_empty()).then_some(tickers);
        self
    }

    /// Whether events for `ticker` pass the filter.
    #[must_use]
    pub fn accepts(&self, ticker: &str) -> bool {
        self.tickers.as_ref().is_none_or(|tickers| {
            tickers
                .binary_search_by(|t| t.as_str().cmp(ticker))
                .is_ok()
        })
    }
}

// =============================================================================
// Handler Interface
// =============================================================================

/// Handler errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Payload failed validation.
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    /// Repository write failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Publisher write failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// What a handler did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Persisted and published right away.
    Stored,
    /// Held in the buffer for a later flush.
    Buffered,
    /// Appended and triggered a flush of this many events.
    Flushed(usize),
    /// Ticker outside the subscription filter; dropped.
    Filtered,
}

/// A streaming feed handler.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Subscription this handler needs on every connection.
    fn subscription(&self) -> &Subscription;

    /// Channel the handler is registered under.
    fn channel(&self) -> &str {
        &self.subscription().channel
    }

    /// Process one payload from the channel.
    async fn handle(&self, payload: Payload) -> Result<HandleOutcome, HandlerError>;

    /// Drain any held state before the process exits.
    async fn shutdown(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Shared handler handle.
pub type SharedHandler = Arc<dyn ChannelHandler>;

/// The standard handler set, in registration order.
///
/// Price, option trade and per-strike GEX handlers are narrowed to
/// `tickers`; the rest accept every ticker.
#[must_use]
pub fn default_handlers(
    tickers: &[String],
    policy: FlushPolicy,
    repository: &SharedRepository,
    publisher: &SharedPublisher,
) -> Vec<SharedHandler> {
    let repo = || Arc::clone(repository);
    let publ = || Arc::clone(publisher);
    let handlers: [SharedHandler; 7] = [
        Arc::new(ImmediateHandler::flow_alerts(repo(), publ())),
        Arc::new(PriceHandler::new(tickers, repo(), publ())),
        Arc::new(BufferedHandler::option_trades(tickers, policy, repo(), publ())),
        Arc::new(ImmediateHandler::gex(repo(), publ())),
        Arc::new(ImmediateHandler::gex_strike(tickers, repo(), publ())),
        Arc::new(ImmediateHandler::gex_strike_expiry(tickers, repo(), publ())),
        Arc::new(ImmediateHandler::news(repo(), publ())),
    ];
    handlers.into()
}
