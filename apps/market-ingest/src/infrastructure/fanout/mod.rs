//! In-Memory Fan-Out Publisher
//!
//! Implements the [`Publisher`] port with three sinks:
//!
//! - **Logs**: capped append-only history per stream, oldest evicted first
//! - **Snapshots**: latest value at a stable key (`price:SPY`, `gex:SPY`, ...)
//! - **Live**: a `tokio::sync::broadcast` channel for in-process subscribers
//!
//! GEX feeds are snapshot-only; they keep no history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::ports::{PublishError, Publisher};
use crate::domain::bars::PriceBar;
use crate::domain::events::NormalizedEvent;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Capacities for the live channel and the capped logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Live broadcast channel capacity.
    pub channel_capacity: usize,
    /// Flow alert log length.
    pub flow_alert_maxlen: usize,
    /// Price tick log length.
    pub price_tick_maxlen: usize,
    /// Price bar log length (12 hours of one-minute bars).
    pub price_bar_maxlen: usize,
    /// Option trade log length.
    pub option_trade_maxlen: usize,
    /// News log length.
    pub news_maxlen: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4096,
            flow_alert_maxlen: 10_000,
            price_tick_maxlen: 2048,
            price_bar_maxlen: 720,
            option_trade_maxlen: 10_000,
            news_maxlen: 1000,
        }
    }
}

impl FanoutConfig {
    const fn maxlen(&self, stream: LogStream) -> usize {
        match stream {
            LogStream::FlowAlerts => self.flow_alert_maxlen,
            LogStream::PriceTicks => self.price_tick_maxlen,
            LogStream::PriceBars => self.price_bar_maxlen,
            LogStream::OptionTrades => self.option_trade_maxlen,
            LogStream::News => self.news_maxlen,
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Item carried by logs, snapshots and the live channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FanoutMessage {
    /// Normalized event.
    Event(NormalizedEvent),
    /// One-minute price bar.
    Bar(PriceBar),
}

/// Capped history streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Flow alerts.
    FlowAlerts,
    /// Price ticks.
    PriceTicks,
    /// One-minute price bars.
    PriceBars,
    /// Option trades.
    OptionTrades,
    /// News headlines.
    News,
}

impl LogStream {
    /// Stream carrying an event, if the feed keeps history.
    #[must_use]
    pub const fn for_event(event: &NormalizedEvent) -> Option<Self> {
        match event {
            NormalizedEvent::FlowAlert(_) => Some(Self::FlowAlerts),
            NormalizedEvent::PriceTick(_) => Some(Self::PriceTicks),
            NormalizedEvent::OptionTrade(_) => Some(Self::OptionTrades),
            NormalizedEvent::News(_) => Some(Self::News),
            NormalizedEvent::GexSnapshot(_)
            | NormalizedEvent::GexStrike(_)
            | NormalizedEvent::GexStrikeExpiry(_) => None,
        }
    }
}

/// Snapshot key for an event, if the feed keeps a latest value.
#[must_use]
pub fn snapshot_key(event: &NormalizedEvent) -> Option<String> {
    match event {
        NormalizedEvent::PriceTick(e) => Some(format!("price:{}", e.ticker)),
        NormalizedEvent::GexSnapshot(e) => Some(format!("gex:{}", e.ticker)),
        NormalizedEvent::GexStrike(e) => {
            Some(format!("gex_strike:{}:{}", e.ticker, e.strike.normalize()))
        }
        NormalizedEvent::GexStrikeExpiry(e) => Some(format!(
            "gex_strike_expiry:{}:{}:{}",
            e.ticker,
            e.expiry,
            e.strike.normalize()
        )),
        NormalizedEvent::FlowAlert(_)
        | NormalizedEvent::OptionTrade(_)
        | NormalizedEvent::News(_) => None,
    }
}

// =============================================================================
// Publisher
// =============================================================================

#[derive(Debug, Default)]
struct FanoutState {
    logs: HashMap<LogStream, VecDeque<FanoutMessage>>,
    snapshots: HashMap<String, FanoutMessage>,
}

/// In-process publisher with capped logs, snapshots and a live channel.
#[derive(Debug)]
pub struct FanoutPublisher {
    config: FanoutConfig,
    state: Mutex<FanoutState>,
    live_tx: broadcast::Sender<FanoutMessage>,
    closed: AtomicBool,
}

impl FanoutPublisher {
    /// Create a publisher with the given capacities.
    #[must_use]
    pub fn new(config: FanoutConfig) -> Self {
        let (live_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            state: Mutex::new(FanoutState::default()),
            live_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a publisher with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FanoutConfig::default())
    }

    /// Get a new receiver for live messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FanoutMessage> {
        self.live_tx.subscribe()
    }

    /// Number of active live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.live_tx.receiver_count()
    }

    /// Latest value stored at a snapshot key.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<FanoutMessage> {
        self.state.lock().snapshots.get(key).cloned()
    }

    /// All snapshot keys, sorted.
    #[must_use]
    pub fn snapshot_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().snapshots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Contents of a log, oldest first.
    #[must_use]
    pub fn log(&self, stream: LogStream) -> Vec<FanoutMessage> {
        self.state
            .lock()
            .logs
            .get(&stream)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current length of a log.
    #[must_use]
    pub fn log_len(&self, stream: LogStream) -> usize {
        self.state.lock().logs.get(&stream).map_or(0, VecDeque::len)
    }

    fn ensure_open(&self) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }
        Ok(())
    }

    fn record(&self, stream: Option<LogStream>, key: Option<String>, message: &FanoutMessage) {
        let mut state = self.state.lock();
        if let Some(stream) = stream {
            let maxlen = self.config.maxlen(stream);
            let log = state.logs.entry(stream).or_default();
            log.push_back(message.clone());
            while log.len() > maxlen {
                log.pop_front();
            }
        }
        if let Some(key) = key {
            state.snapshots.insert(key, message.clone());
        }
    }

    fn broadcast(&self, message: FanoutMessage) {
        // No receivers is not an error.
        let _ = self.live_tx.send(message);
    }
}

#[async_trait]
impl Publisher for FanoutPublisher {
    async fn publish_event(&self, event: &NormalizedEvent) -> Result<(), PublishError> {
        self.ensure_open()?;
        let message = FanoutMessage::Event(event.clone());
        self.record(LogStream::for_event(event), snapshot_key(event), &message);
        self.broadcast(message);
        metrics::record_events_published(event.kind(), 1);
        Ok(())
    }

    async fn publish_bar(&self, bar: &PriceBar) -> Result<(), PublishError> {
        self.ensure_open()?;
        let message = FanoutMessage::Bar(bar.clone());
        self.record(
            Some(LogStream::PriceBars),
            Some(format!("price_bar:{}", bar.ticker)),
            &message,
        );
        self.broadcast(message);
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(
                receivers = self.receiver_count(),
                snapshots = self.state.lock().snapshots.len(),
                "Publisher closed"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::FeedKind;
    use crate::domain::normalize;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};

    fn event(kind: FeedKind, payload: Value) -> NormalizedEvent {
        normalize::normalize(kind, payload.as_object().unwrap()).unwrap()
    }

    fn tick(price: f64, ts: &str) -> NormalizedEvent {
        event(
            FeedKind::PriceTick,
            json!({"ticker": "SPY", "price": price, "timestamp": ts}),
        )
    }

    fn bar(close: &str) -> PriceBar {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap();
        let close = close.parse().unwrap();
        PriceBar {
            ticker: "SPY".to_string(),
            start,
            end: start + chrono::TimeDelta::minutes(1),
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    #[tokio::test]
    async fn price_ticks_overwrite_snapshot_and_append_log() {
        let publisher = FanoutPublisher::with_defaults();
        publisher
            .publish_event(&tick(500.0, "2024-03-15T14:30:00Z"))
            .await
            .unwrap();
        let latest = tick(501.5, "2024-03-15T14:30:01Z");
        publisher.publish_event(&latest).await.unwrap();

        assert_eq!(
            publisher.snapshot("price:SPY"),
            Some(FanoutMessage::Event(latest))
        );
        assert_eq!(publisher.log_len(LogStream::PriceTicks), 2);
    }

    #[tokio::test]
    async fn gex_keeps_snapshots_only() {
        let publisher = FanoutPublisher::with_defaults();
        let strike = event(
            FeedKind::GexStrike,
            json!({"ticker": "SPY", "strike": "450.00", "timestamp": "2024-03-15T14:30:00Z"}),
        );
        let expiry = event(
            FeedKind::GexStrikeExpiry,
            json!({
                "ticker": "SPY",
                "strike": 450,
                "expiry": "2024-03-15",
                "timestamp": "2024-03-15T14:30:00Z"
            }),
        );
        publisher.publish_event(&strike).await.unwrap();
        publisher.publish_event(&expiry).await.unwrap();

        assert_eq!(
            publisher.snapshot_keys(),
            vec![
                "gex_strike:SPY:450".to_string(),
                "gex_strike_expiry:SPY:2024-03-15:450".to_string(),
            ]
        );
        assert_eq!(publisher.log_len(LogStream::PriceTicks), 0);
    }

    #[tokio::test]
    async fn logs_evict_oldest() {
        let publisher = FanoutPublisher::new(FanoutConfig {
            news_maxlen: 2,
            ..FanoutConfig::default()
        });
        for id in ["n1", "n2", "n3"] {
            let news = event(
                FeedKind::News,
                json!({"id": id, "headline": "Fed holds", "timestamp": "2024-03-15T14:30:00Z"}),
            );
            publisher.publish_event(&news).await.unwrap();
        }

        let ids: Vec<String> = publisher
            .log(LogStream::News)
            .into_iter()
            .map(|message| match message {
                FanoutMessage::Event(event) => event.dedupe_key(),
                FanoutMessage::Bar(_) => String::new(),
            })
            .collect();
        assert_eq!(ids, vec!["n2".to_string(), "n3".to_string()]);
        assert!(publisher.snapshot_keys().is_empty());
    }

    #[tokio::test]
    async fn bars_update_latest_and_reach_subscribers() {
        let publisher = FanoutPublisher::with_defaults();
        let mut rx = publisher.subscribe();

        publisher.publish_bar(&bar("500")).await.unwrap();
        publisher.publish_bar(&bar("501")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), FanoutMessage::Bar(bar("500")));
        assert_eq!(rx.recv().await.unwrap(), FanoutMessage::Bar(bar("501")));
        assert_eq!(
            publisher.snapshot("price_bar:SPY"),
            Some(FanoutMessage::Bar(bar("501")))
        );
        assert_eq!(publisher.log_len(LogStream::PriceBars), 2);
    }

    #[tokio::test]
    async fn publishing_without_receivers_succeeds() {
        let publisher = FanoutPublisher::with_defaults();
        assert_eq!(publisher.receiver_count(), 0);
        publisher.publish_bar(&bar("500")).await.unwrap();
    }

    #[tokio::test]
    async fn closed_publisher_rejects_writes() {
        let publisher = FanoutPublisher::with_defaults();
        publisher.close().await.unwrap();
        assert!(matches!(
            publisher.publish_bar(&bar("500")).await,
            Err(PublishError::Closed)
        ));
    }
}
