//! Immediate handler: normalize, persist, publish, one payload at a time.

use async_trait::async_trait;

use super::{ChannelHandler, HandleOutcome, HandlerError, Subscription, channels};
use crate::application::ports::{SharedPublisher, SharedRepository};
use crate::domain::events::FeedKind;
use crate::domain::normalize::{self, Payload};
use crate::infrastructure::metrics;

/// Handler for low-volume feeds that are written through as they arrive.
pub struct ImmediateHandler {
    subscription: Subscription,
    kind: FeedKind,
    repository: SharedRepository,
    publisher: SharedPublisher,
}

impl ImmediateHandler {
    /// Create a handler for `channel` producing `kind` events.
    #[must_use]
    pub fn new(
        channel: &str,
        kind: FeedKind,
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        Self {
            subscription: Subscription::new(channel),
            kind,
            repository,
            publisher,
        }
    }

    /// Restrict the handler to a ticker set.
    #[must_use]
    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.subscription = self.subscription.with_tickers(tickers);
        self
    }

    /// Flow alerts, all tickers.
    #[must_use]
    pub fn flow_alerts(repository: SharedRepository, publisher: SharedPublisher) -> Self {
        Self::new(channels::FLOW_ALERTS, FeedKind::FlowAlert, repository, publisher)
    }

    /// Aggregate gamma exposure, all tickers.
    #[must_use]
    pub fn gex(repository: SharedRepository, publisher: SharedPublisher) -> Self {
        Self::new(channels::GEX, FeedKind::GexSnapshot, repository, publisher)
    }

    /// Gamma exposure by strike for the configured tickers.
    #[must_use]
    pub fn gex_strike(
        tickers: &[String],
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        Self::new(channels::GEX_STRIKE, FeedKind::GexStrike, repository, publisher)
            .with_tickers(tickers)
    }

    /// Gamma exposure by strike and expiry for the configured tickers.
    #[must_use]
    pub fn gex_strike_expiry(
        tickers: &[String],
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        Self::new(
            channels::GEX_STRIKE_EXPIRY,
            FeedKind::GexStrikeExpiry,
            repository,
            publisher,
        )
        .with_tickers(tickers)
    }

    /// News headlines.
    #[must_use]
    pub fn news(repository: SharedRepository, publisher: SharedPublisher) -> Self {
        Self::new(channels::NEWS, FeedKind::News, repository, publisher)
    }

    /// Feed produced by this handler.
    #[must_use]
    pub const fn kind(&self) -> FeedKind {
        self.kind
    }
}

#[async_trait]
impl ChannelHandler for ImmediateHandler {
    fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    async fn handle(&self, payload: Payload) -> Result<HandleOutcome, HandlerError> {
        let event = normalize::normalize(self.kind, &payload)?;

        if let Some(ticker) = event.ticker()
            && !self.subscription.accepts(ticker)
        {
            tracing::debug!(channel = %self.subscription.channel, ticker, "Ticker outside filter, dropping");
            return Ok(HandleOutcome::Filtered);
        }

        self.repository.upsert_event(&event).await?;
        metrics::record_events_persisted(self.kind, 1);
        self.publisher.publish_event(&event).await?;
        Ok(HandleOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockall::predicate::always;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::{MockPublisher, MockRepository, RepositoryError};
    use crate::domain::events::NormalizedEvent;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn strike_row(ticker: &str) -> Payload {
        payload(json!({
            "ticker": ticker,
            "strike": 450,
            "timestamp": "2024-03-15T14:30:00Z",
            "gex": 1.0
        }))
    }

    #[tokio::test]
    async fn persists_then_publishes() {
        let mut repository = MockRepository::new();
        repository
            .expect_upsert_event()
            .withf(|event: &NormalizedEvent| event.dedupe_key() == "a-1")
            .times(1)
            .returning(|_| Ok(()));
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_event()
            .with(always())
            .times(1)
            .returning(|_| Ok(()));

        let handler = ImmediateHandler::flow_alerts(Arc::new(repository), Arc::new(publisher));
        let outcome = handler
            .handle(payload(json!({
                "alert_id": "a-1",
                "ticker": "spy",
                "timestamp": "2024-03-15T14:30:00Z"
            })))
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Stored);
    }

    #[tokio::test]
    async fn filtered_ticker_is_dropped_without_error() {
        let mut repository = MockRepository::new();
        repository.expect_upsert_event().never();
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_event().never();

        let handler = ImmediateHandler::gex_strike(
            &["SPY".to_string()],
            Arc::new(repository),
            Arc::new(publisher),
        );
        let outcome = handler.handle(strike_row("TSLA")).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Filtered);
    }

    #[tokio::test]
    async fn invalid_payload_is_an_error() {
        let handler = ImmediateHandler::news(
            Arc::new(MockRepository::new()),
            Arc::new(MockPublisher::new()),
        );
        let err = handler.handle(payload(json!({"id": "x"}))).await.unwrap_err();
        assert!(matches!(err, HandlerError::Normalize(_)));
    }

    #[tokio::test]
    async fn repository_failure_skips_publish() {
        let mut repository = MockRepository::new();
        repository.expect_upsert_event().times(1).returning(|_| {
            Err(RepositoryError::WriteFailed {
                message: "disk full".to_string(),
            })
        });
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_event().never();

        let handler = ImmediateHandler::gex_strike_expiry(
            &[],
            Arc::new(repository),
            Arc::new(publisher),
        );
        let err = handler
            .handle(payload(json!({
                "ticker": "SPY",
                "expiry": "2024-03-22",
                "strike": 450,
                "timestamp": "2024-03-15T14:30:00Z"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Repository(_)));
    }

    #[test]
    fn constructors_declare_channels() {
        let repo: SharedRepository = Arc::new(MockRepository::new());
        let publisher: SharedPublisher = Arc::new(MockPublisher::new());
        let gex = ImmediateHandler::gex(repo.clone(), publisher.clone());
        assert_eq!(gex.channel(), "gex");
        assert_eq!(gex.kind(), FeedKind::GexSnapshot);
        assert!(gex.subscription().tickers.is_none());

        let strike = ImmediateHandler::gex_strike(&["qqq".to_string()], repo, publisher);
        assert_eq!(strike.subscription().tickers, Some(vec!["QQQ".to_string()]));
    }
}
