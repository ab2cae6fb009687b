//! Normalized Events
//!
//! Typed events produced by the normalization layer from raw feed payloads.
//! Every variant carries a natural identifier used for idempotent upserts,
//! an upper-cased ticker, a UTC event timestamp and the raw payload it was
//! parsed from.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Feed Kind
// =============================================================================

/// Logical feed an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Unusual options activity alerts.
    FlowAlert,
    /// Underlying price ticks.
    PriceTick,
    /// Individual option prints.
    OptionTrade,
    /// Aggregate gamma exposure per ticker.
    GexSnapshot,
    /// Gamma exposure broken down by strike.
    GexStrike,
    /// Gamma exposure broken down by strike and expiry.
    GexStrikeExpiry,
    /// Market news headlines.
    News,
}

impl FeedKind {
    /// All feeds in declaration order.
    pub const ALL: [Self; 7] = [
        Self::FlowAlert,
        Self::PriceTick,
        Self::OptionTrade,
        Self::GexSnapshot,
        Self::GexStrike,
        Self::GexStrikeExpiry,
        Self::News,
    ];

    /// Stable label used in logs, metrics and storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlowAlert => "flow_alert",
            Self::PriceTick => "price_tick",
            Self::OptionTrade => "option_trade",
            Self::GexSnapshot => "gex",
            Self::GexStrike => "gex_strike",
            Self::GexStrikeExpiry => "gex_strike_expiry",
            Self::News => "news",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event Variants
// =============================================================================

/// Unusual options activity alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAlert {
    /// Upstream alert identifier.
    pub alert_id: String,
    /// Underlying ticker.
    pub ticker: String,
    /// When the alert fired.
    pub event_timestamp: DateTime<Utc>,
    /// Name of the rule that triggered the alert.
    pub rule_name: Option<String>,
    /// Bullish / bearish direction label.
    pub direction: Option<String>,
    /// Whether the flow was a sweep.
    pub sweep: Option<bool>,
    /// Premium of the triggering print.
    pub premium: Option<Decimal>,
    /// Executed at or above the ask.
    pub ask_side: Option<bool>,
    /// Executed at or below the bid.
    pub bid_side: Option<bool>,
    /// Total premium across the aggregated prints.
    pub aggregated_premium: Option<Decimal>,
    /// Identifiers of the prints making up the alert.
    pub trade_ids: Vec<String>,
    /// Payload as received.
    pub raw: Value,
}

/// Single underlying price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Underlying ticker.
    pub ticker: String,
    /// Observation time.
    pub event_timestamp: DateTime<Utc>,
    /// Last traded price.
    pub last_price: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Payload as received.
    pub raw: Value,
}

/// Single option print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTrade {
    /// Upstream trade identifier.
    pub trade_id: String,
    /// Underlying ticker.
    pub ticker: String,
    /// OCC option symbol.
    pub option_symbol: Option<String>,
    /// Execution time.
    pub event_timestamp: DateTime<Utc>,
    /// Price per contract.
    pub price: Option<Decimal>,
    /// Contracts traded.
    pub size: Option<i64>,
    /// Total premium.
    pub premium: Option<Decimal>,
    /// Aggressor side label.
    pub side: Option<String>,
    /// Reporting exchange.
    pub exchange: Option<String>,
    /// Payload as received.
    pub raw: Value,
}

/// Aggregate dealer exposure snapshot for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GexSnapshot {
    /// Underlying ticker.
    pub ticker: String,
    /// Snapshot time.
    pub event_timestamp: DateTime<Utc>,
    /// Gamma exposure.
    pub gamma_exposure: Option<f64>,
    /// Delta exposure.
    pub delta_exposure: Option<f64>,
    /// Vanna exposure.
    pub vanna: Option<f64>,
    /// Charm exposure.
    pub charm: Option<f64>,
    /// Payload as received.
    pub raw: Value,
}

/// Gamma exposure at one strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GexStrike {
    /// Underlying ticker.
    pub ticker: String,
    /// Strike price.
    pub strike: Decimal,
    /// Snapshot time.
    pub event_timestamp: DateTime<Utc>,
    /// Gamma exposure at the strike.
    pub gamma_exposure: Option<f64>,
    /// Open interest at the strike.
    pub open_interest: Option<i64>,
    /// Payload as received.
    pub raw: Value,
}

/// Gamma exposure at one strike of one expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GexStrikeExpiry {
    /// Underlying ticker.
    pub ticker: String,
    /// Expiration date.
    pub expiry: NaiveDate,
    /// Strike price.
    pub strike: Decimal,
    /// Snapshot time.
    pub event_timestamp: DateTime<Utc>,
    /// Gamma exposure at the strike and expiry.
    pub gamma_exposure: Option<f64>,
    /// Payload as received.
    pub raw: Value,
}

/// Market news headline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Upstream headline identifier.
    pub headline_id: String,
    /// Publication time.
    pub event_timestamp: DateTime<Utc>,
    /// Headline text.
    pub headline: String,
    /// Publisher.
    pub source: Option<String>,
    /// Tickers mentioned, upper-cased.
    pub tickers: Vec<String>,
    /// Flagged as a political headline upstream.
    pub is_trump: Option<bool>,
    /// Payload as received.
    pub raw: Value,
}

// =============================================================================
// Normalized Event
// =============================================================================

/// A typed event from any feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedEvent {
    /// Flow alert.
    FlowAlert(FlowAlert),
    /// Price tick.
    PriceTick(PriceTick),
    /// Option trade.
    OptionTrade(OptionTrade),
    /// Gamma exposure snapshot.
    GexSnapshot(GexSnapshot),
    /// Gamma exposure by strike.
    GexStrike(GexStrike),
    /// Gamma exposure by strike and expiry.
    GexStrikeExpiry(GexStrikeExpiry),
    /// News headline.
    News(NewsItem),
}

impl NormalizedEvent {
    /// Feed this event belongs to.
    #[must_use]
    pub const fn kind(&self) -> FeedKind {
        match self {
            Self::FlowAlert(_) => FeedKind::FlowAlert,
            Self::PriceTick(_) => FeedKind::PriceTick,
            Self::OptionTrade(_) => FeedKind::OptionTrade,
            Self::GexSnapshot(_) => FeedKind::GexSnapshot,
            Self::GexStrike(_) => FeedKind::GexStrike,
            Self::GexStrikeExpiry(_) => FeedKind::GexStrikeExpiry,
            Self::News(_) => FeedKind::News,
        }
    }

    /// Ticker the event refers to.
    ///
    /// News items report their first mentioned ticker, if any.
    #[must_use]
    pub fn ticker(&self) -> Option<&str> {
        match self {
            Self::FlowAlert(e) => Some(&e.ticker),
            Self::PriceTick(e) => Some(&e.ticker),
            Self::OptionTrade(e) => Some(&e.ticker),
            Self::GexSnapshot(e) => Some(&e.ticker),
            Self::GexStrike(e) => Some(&e.ticker),
            Self::GexStrikeExpiry(e) => Some(&e.ticker),
            Self::News(e) => e.tickers.first().map(String::as_str),
        }
    }

    /// Event timestamp.
    #[must_use]
    pub const fn event_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::FlowAlert(e) => e.event_timestamp,
            Self::PriceTick(e) => e.event_timestamp,
            Self::OptionTrade(e) => e.event_timestamp,
            Self::GexSnapshot(e) => e.event_timestamp,
            Self::GexStrike(e) => e.event_timestamp,
            Self::GexStrikeExpiry(e) => e.event_timestamp,
            Self::News(e) => e.event_timestamp,
        }
    }

    /// Raw payload the event was parsed from.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        match self {
            Self::FlowAlert(e) => &e.raw,
            Self::PriceTick(e) => &e.raw,
            Self::OptionTrade(e) => &e.raw,
            Self::GexSnapshot(e) => &e.raw,
            Self::GexStrike(e) => &e.raw,
            Self::GexStrikeExpiry(e) => &e.raw,
            Self::News(e) => &e.raw,
        }
    }

    /// Natural identity of the event within its feed.
    ///
    /// Two events with the same kind and key describe the same logical
    /// record and must collapse into one row downstream.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        match self {
            Self::FlowAlert(e) => e.alert_id.clone(),
            Self::OptionTrade(e) => e.trade_id.clone(),
            Self::News(e) => e.headline_id.clone(),
            Self::PriceTick(e) => format!("{}@{}", e.ticker, stamp(e.event_timestamp)),
            Self::GexSnapshot(e) => format!("{}@{}", e.ticker, stamp(e.event_timestamp)),
            Self::GexStrike(e) => format!(
                "{}:{}@{}",
                e.ticker,
                e.strike.normalize(),
                stamp(e.event_timestamp)
            ),
            Self::GexStrikeExpiry(e) => format!(
                "{}:{}:{}@{}",
                e.ticker,
                e.expiry,
                e.strike.normalize(),
                stamp(e.event_timestamp)
            ),
        }
    }
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// Tests
// =============================================================================
