//! Buffered handler for high-volume feeds.
//!
//! Normalized events accumulate in memory and are written as one batch when
//! the buffer reaches its size bound or when a payload arrives after the
//! flush interval has elapsed. The size/interval check runs only when a
//! payload arrives; an idle buffer is drained by [`BufferedHandler::flush`]
//! at shutdown.

use std::mem;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ChannelHandler, HandleOutcome, HandlerError, Subscription, channels};
use crate::application::ports::{SharedPublisher, SharedRepository};
use crate::domain::events::{FeedKind, NormalizedEvent};
use crate::domain::normalize::{self, Payload};
use crate::infrastructure::metrics;

/// Flush bounds for a buffered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush when this many events are held.
    pub max_items: usize,
    /// Flush when a payload arrives this long after the previous flush.
    pub interval: Duration,
}

impl FlushPolicy {
    /// Create a policy. A zero size is treated as one.
    #[must_use]
    pub fn new(max_items: usize, interval: Duration) -> Self {
        Self {
            max_items: max_items.max(1),
            interval,
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(2))
    }
}

#[derive(Debug)]
struct BufferState {
    items: Vec<NormalizedEvent>,
    last_flush: Instant,
}

/// Handler that batches writes.
pub struct BufferedHandler {
    subscription: Subscription,
    kind: FeedKind,
    policy: FlushPolicy,
    state: Mutex<BufferState>,
    repository: SharedRepository,
    publisher: SharedPublisher,
}

impl BufferedHandler {
    /// Create a buffered handler for `channel` producing `kind` events.
    #[must_use]
    pub fn new(
        channel: &str,
        kind: FeedKind,
        policy: FlushPolicy,
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        Self {
            subscription: Subscription::new(channel),
            kind,
            policy,
            state: Mutex::new(BufferState {
                items: Vec::with_capacity(policy.max_items.min(4096)),
                last_flush: Instant::now(),
            }),
            repository,
            publisher,
        }
    }

    /// Option prints for the configured tickers.
    #[must_use]
    pub fn option_trades(
        tickers: &[String],
        policy: FlushPolicy,
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        let mut handler = Self::new(
            channels::OPTION_TRADES,
            FeedKind::OptionTrade,
            policy,
            repository,
            publisher,
        );
        handler.subscription = handler.subscription.with_tickers(tickers);
        handler
    }

    /// Flush bounds in effect.
    #[must_use]
    pub const fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Events currently held.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Write everything currently held, regardless of bounds.
    ///
    /// Returns the number of events flushed.
    ///
    /// # Errors
    ///
    /// Returns the repository error if the batch write fails, or the first
    /// publisher error after every event has been offered.
    pub async fn flush(&self) -> Result<usize, HandlerError> {
        let batch = self.take_batch();
        self.write_batch(batch).await
    }

    fn take_batch(&self) -> Vec<NormalizedEvent> {
        let mut state = self.state.lock();
        state.last_flush = Instant::now();
        mem::take(&mut state.items)
    }

    /// Append an event and, if a bound is hit, take the batch in the same
    /// critical section so each event lands in exactly one batch.
    fn push(&self, event: NormalizedEvent) -> Option<Vec<NormalizedEvent>> {
        let mut state = self.state.lock();
        state.items.push(event);
        let full = state.items.len() >= self.policy.max_items;
        let stale = state.last_flush.elapsed() >= self.policy.interval;
        if full || stale {
            state.last_flush = Instant::now();
            Some(mem::take(&mut state.items))
        } else {
            None
        }
    }

    async fn write_batch(&self, batch: Vec<NormalizedEvent>) -> Result<usize, HandlerError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        self.repository.upsert_events(&batch).await?;
        metrics::record_events_persisted(self.kind, size as u64);
        metrics::record_buffer_flush(&self.subscription.channel, size);

        let mut first_error = None;
        for event in &batch {
            if let Err(e) = self.publisher.publish_event(event).await {
                tracing::warn!(channel = %self.subscription.channel, error = %e, "Publish failed during flush");
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(channel = %self.subscription.channel, size, "Flushed buffer");
        first_error.map_or(Ok(size), |e| Err(e.into()))
    }
}

#[async_trait]
impl ChannelHandler for BufferedHandler {
    fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    async fn handle(&self, payload: Payload) -> Result<HandleOutcome, HandlerError> {
        let event = normalize::normalize(self.kind, &payload)?;

        if let Some(ticker) = event.ticker()
            && !self.subscription.accepts(ticker)
        {
            return Ok(HandleOutcome::Filtered);
        }

        match self.push(event) {
            Some(batch) => self.write_batch(batch).await.map(HandleOutcome::Flushed),
            None => Ok(HandleOutcome::Buffered),
        }
    }

    async fn shutdown(&self) -> Result<(), HandlerError> {
        let flushed = self.flush().await?;
        if flushed > 0 {
            tracing::info!(channel = %self.subscription.channel, flushed, "Drained buffer on shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockPublisher, MockRepository, PublishError};

    fn trade(id: &str, ticker: &str) -> Payload {
        json!({
            "id": id,
            "underlying_symbol": ticker,
            "executed_at": "2024-03-15T14:30:00Z",
            "price": "1.25",
            "size": 10
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn policy(max_items: usize, secs: u64) -> FlushPolicy {
        FlushPolicy::new(max_items, Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn size_bound_flushes_once() {
        let mut repository = MockRepository::new();
        repository
            .expect_upsert_events()
            .withf(|events: &[NormalizedEvent]| events.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_event()
            .times(2)
            .returning(|_| Ok(()));

        let handler = BufferedHandler::option_trades(
            &[],
            policy(2, 10),
            Arc::new(repository),
            Arc::new(publisher),
        );

        assert_eq!(handler.handle(trade("t1", "SPY")).await.unwrap(), HandleOutcome::Buffered);
        assert_eq!(handler.handle(trade("t2", "SPY")).await.unwrap(), HandleOutcome::Flushed(2));
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flush_happens_on_next_arrival() {
        let mut repository = MockRepository::new();
        repository
            .expect_upsert_events()
            .withf(|events: &[NormalizedEvent]| events.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_event().returning(|_| Ok(()));

        let handler = BufferedHandler::option_trades(
            &[],
            policy(100, 2),
            Arc::new(repository),
            Arc::new(publisher),
        );

        handler.handle(trade("t1", "SPY")).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(handler.pending(), 1);
        assert_eq!(handler.handle(trade("t2", "SPY")).await.unwrap(), HandleOutcome::Flushed(2));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_remainder_exactly_once() {
        let mut repository = MockRepository::new();
        repository
            .expect_upsert_events()
            .withf(|events: &[NormalizedEvent]| events.len() == 1)
            .times(1)
            .returning(|_| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_event()
            .times(1)
            .returning(|_| Ok(()));

        let handler = BufferedHandler::option_trades(
            &[],
            policy(10, 60),
            Arc::new(repository),
            Arc::new(publisher),
        );

        handler.handle(trade("t1", "SPY")).await.unwrap();
        handler.shutdown().await.unwrap();
        handler.shutdown().await.unwrap();
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn filtered_trades_never_buffer() {
        let handler = BufferedHandler::option_trades(
            &["SPY".to_string()],
            policy(1, 60),
            Arc::new(MockRepository::new()),
            Arc::new(MockPublisher::new()),
        );
        let outcome = handler.handle(trade("t1", "QQQ")).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Filtered);
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn publish_failure_still_offers_every_event() {
        let mut repository = MockRepository::new();
        repository.expect_upsert_events().times(1).returning(|_| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_event()
            .times(2)
            .returning(|_| Err(PublishError::Closed));

        let handler = BufferedHandler::option_trades(
            &[],
            policy(2, 60),
            Arc::new(repository),
            Arc::new(publisher),
        );
        handler.handle(trade("t1", "SPY")).await.unwrap();
        let err = handler.handle(trade("t2", "SPY")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Publish(PublishError::Closed)));
    }

    #[test]
    fn zero_size_policy_is_clamped() {
        assert_eq!(FlushPolicy::new(0, Duration::ZERO).max_items, 1);
    }
}
