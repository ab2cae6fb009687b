//! Price handler: persists ticks and maintains one-minute bars.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ChannelHandler, HandleOutcome, HandlerError, Subscription, channels};
use crate::application::ports::{SharedPublisher, SharedRepository};
use crate::domain::bars::BarAggregator;
use crate::domain::events::{FeedKind, NormalizedEvent};
use crate::domain::normalize::{self, Payload};
use crate::infrastructure::metrics;

const TICKER_KEYS: [&str; 3] = ["ticker", "symbol", "underlying_symbol"];

/// Handler for the `price` channel.
///
/// Each tick is stored and published like any other event, then folded into
/// the ticker's current one-minute bar. When a tick opens a new minute the
/// finished bar is published before the new in-progress bar.
pub struct PriceHandler {
    subscription: Subscription,
    default_ticker: Option<String>,
    aggregator: Mutex<BarAggregator>,
    repository: SharedRepository,
    publisher: SharedPublisher,
}

impl PriceHandler {
    /// Create a price handler for the given tickers.
    ///
    /// Payloads that carry no ticker are attributed to the configured ticker
    /// when exactly one is configured.
    #[must_use]
    pub fn new(tickers: &[String], repository: SharedRepository, publisher: SharedPublisher) -> Self {
        let subscription = Subscription::new(channels::PRICE).with_tickers(tickers);
        let default_ticker = match subscription.tickers.as_deref() {
            Some([only]) => Some(only.clone()),
            _ => None,
        };
        Self {
            subscription,
            default_ticker,
            aggregator: Mutex::new(BarAggregator::new()),
            repository,
            publisher,
        }
    }

    /// Ticker assumed for payloads without one.
    #[must_use]
    pub fn default_ticker(&self) -> Option<&str> {
        self.default_ticker.as_deref()
    }

    fn with_default_ticker(&self, mut payload: Payload) -> Payload {
        let has_ticker = TICKER_KEYS
            .iter()
            .any(|key| payload.get(*key).is_some_and(|v| !v.is_null()));
        if !has_ticker && let Some(ticker) = &self.default_ticker {
            payload.insert("ticker".to_string(), Value::String(ticker.clone()));
        }
        payload
    }
}

#[async_trait]
impl ChannelHandler for PriceHandler {
    fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    async fn handle(&self, payload: Payload) -> Result<HandleOutcome, HandlerError> {
        let payload = self.with_default_ticker(payload);
        let tick = normalize::price_tick(&payload)?;

        if !self.subscription.accepts(&tick.ticker) {
            return Ok(HandleOutcome::Filtered);
        }

        let (timestamp, price) = (tick.event_timestamp, tick.last_price);
        let event = NormalizedEvent::PriceTick(tick);
        self.repository.upsert_event(&event).await?;
        metrics::record_events_persisted(FeedKind::PriceTick, 1);
        self.publisher.publish_event(&event).await?;

        let ticker = event.ticker().unwrap_or_default();
        let update = self.aggregator.lock().add_tick(ticker, timestamp, price);

        if let Some(completed) = &update.completed {
            self.publisher.publish_bar(completed).await?;
        }
        self.publisher.publish_bar(&update.current).await?;

        Ok(HandleOutcome::Stored)
    }
}
