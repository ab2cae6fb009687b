//! Normalization Layer
//!
//! Per-feed parsers that validate raw payloads and canonicalize them into
//! [`NormalizedEvent`]s. Both the streaming handlers and the REST response
//! processors go through these functions, so a payload means the same thing
//! regardless of which transport delivered it.
//!
//! Each parser keeps the original payload verbatim in the event's `raw`
//! field.

pub mod fields;

use serde_json::Value;

use crate::domain::events::{
    FeedKind, FlowAlert, GexSnapshot, GexStrike, GexStrikeExpiry, NewsItem, NormalizedEvent,
    OptionTrade, PriceTick,
};

pub use fields::{Fields, Payload, parse_timestamp};
use fields::required;

/// Errors raised while normalizing a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// A required field is absent or null under every alias.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but cannot be coerced.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        /// Canonical field name.
        field: &'static str,
        /// What went wrong.
        reason: String,
    },
}

// =============================================================================
// Aliases
// =============================================================================

const TICKER: &[&str] = &["ticker", "symbol"];
const TIMESTAMP: &[&str] = &["timestamp", "event_timestamp"];

/// Normalize a payload for the given feed.
///
/// # Errors
///
/// Returns [`NormalizeError`] if a required field is missing or a present
/// field cannot be coerced.
pub fn normalize(kind: FeedKind, payload: &Payload) -> Result<NormalizedEvent, NormalizeError> {
    Ok(match kind {
        FeedKind::FlowAlert => NormalizedEvent::FlowAlert(flow_alert(payload)?),
        FeedKind::PriceTick => NormalizedEvent::PriceTick(price_tick(payload)?),
        FeedKind::OptionTrade => NormalizedEvent::OptionTrade(option_trade(payload)?),
        FeedKind::GexSnapshot => NormalizedEvent::GexSnapshot(gex_snapshot(payload)?),
        FeedKind::GexStrike => NormalizedEvent::GexStrike(gex_strike(payload)?),
        FeedKind::GexStrikeExpiry => NormalizedEvent::GexStrikeExpiry(gex_strike_expiry(payload)?),
        FeedKind::News => NormalizedEvent::News(news_item(payload)?),
    })
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse a flow alert.
///
/// When neither `timestamp` nor `event_timestamp` is present the alert time
/// falls back to the execution or window start time.
///
/// # Errors
///
/// Fails when the alert id, ticker or every timestamp alias is missing.
pub fn flow_alert(payload: &Payload) -> Result<FlowAlert, NormalizeError> {
    let f = Fields::new(payload);
    let event_timestamp = match f.timestamp("timestamp", TIMESTAMP)? {
        Some(ts) => ts,
        None => required(
            "timestamp",
            f.timestamp("timestamp", &["executed_at", "start_time", "created_at"])?,
        )?,
    };

    Ok(FlowAlert {
        alert_id: required("alert_id", f.text("alert_id", &["alert_id", "id"])?)?,
        ticker: required("ticker", f.ticker("ticker", TICKER)?)?,
        event_timestamp,
        rule_name: f.text("rule_name", &["rule_name"])?,
        direction: f.text("direction", &["direction"])?,
        sweep: f.boolean("sweep", &["sweep", "is_sweep"])?,
        premium: f.decimal("premium", &["premium"])?,
        ask_side: f.boolean("ask_side", &["is_ask", "ask_side"])?,
        bid_side: f.boolean("bid_side", &["is_bid", "bid_side"])?,
        aggregated_premium: f.decimal(
            "aggregated_premium",
            &["aggregated_premium", "total_premium"],
        )?,
        trade_ids: f.list("trade_ids", &["trade_ids", "trade_id"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse an underlying price tick.
///
/// # Errors
///
/// Fails when the ticker, timestamp or price is missing.
pub fn price_tick(payload: &Payload) -> Result<PriceTick, NormalizeError> {
    let f = Fields::new(payload);
    Ok(PriceTick {
        ticker: required(
            "ticker",
            f.ticker("ticker", &["ticker", "symbol", "underlying_symbol"])?,
        )?,
        event_timestamp: required(
            "timestamp",
            f.timestamp("timestamp", &["timestamp", "event_timestamp", "time"])?,
        )?,
        last_price: required(
            "last_price",
            f.decimal("last_price", &["price", "last_price", "close"])?,
        )?,
        bid: f.decimal("bid", &["bid"])?,
        ask: f.decimal("ask", &["ask"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse an option print.
///
/// # Errors
///
/// Fails when the trade id, ticker or timestamp is missing.
pub fn option_trade(payload: &Payload) -> Result<OptionTrade, NormalizeError> {
    let f = Fields::new(payload);
    Ok(OptionTrade {
        trade_id: required("trade_id", f.text("trade_id", &["trade_id", "id"])?)?,
        ticker: required(
            "ticker",
            f.ticker("ticker", &["ticker", "underlying", "underlying_symbol"])?,
        )?,
        option_symbol: f.text("option_symbol", &["option_symbol", "symbol"])?,
        event_timestamp: required(
            "timestamp",
            f.timestamp("timestamp", &["timestamp", "event_timestamp", "executed_at"])?,
        )?,
        price: f.decimal("price", &["price"])?,
        size: f.integer("size", &["size"])?,
        premium: f.decimal("premium", &["premium"])?,
        side: f.text("side", &["side"])?,
        exchange: f.text("exchange", &["exchange"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse an aggregate gamma exposure snapshot.
///
/// # Errors
///
/// Fails when the ticker or timestamp is missing.
pub fn gex_snapshot(payload: &Payload) -> Result<GexSnapshot, NormalizeError> {
    let f = Fields::new(payload);
    Ok(GexSnapshot {
        ticker: required("ticker", f.ticker("ticker", TICKER)?)?,
        event_timestamp: required("timestamp", f.timestamp("timestamp", TIMESTAMP)?)?,
        gamma_exposure: f.float("gamma_exposure", &["gamma_exposure", "gex"])?,
        delta_exposure: f.float("delta_exposure", &["delta_exposure", "dex"])?,
        vanna: f.float("vanna", &["vanna"])?,
        charm: f.float("charm", &["charm"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse a per-strike gamma exposure row.
///
/// # Errors
///
/// Fails when the ticker, strike or timestamp is missing.
pub fn gex_strike(payload: &Payload) -> Result<GexStrike, NormalizeError> {
    let f = Fields::new(payload);
    Ok(GexStrike {
        ticker: required("ticker", f.ticker("ticker", TICKER)?)?,
        strike: required("strike", f.decimal("strike", &["strike", "strike_price"])?)?,
        event_timestamp: required("timestamp", f.timestamp("timestamp", TIMESTAMP)?)?,
        gamma_exposure: f.float("gamma_exposure", &["gamma_exposure", "gex"])?,
        open_interest: f.integer("open_interest", &["open_interest", "oi"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse a per-strike, per-expiry gamma exposure row.
///
/// # Errors
///
/// Fails when the ticker, expiry, strike or timestamp is missing.
pub fn gex_strike_expiry(payload: &Payload) -> Result<GexStrikeExpiry, NormalizeError> {
    let f = Fields::new(payload);
    Ok(GexStrikeExpiry {
        ticker: required("ticker", f.ticker("ticker", TICKER)?)?,
        expiry: required("expiry", f.date("expiry", &["expiry", "expiration"])?)?,
        strike: required("strike", f.decimal("strike", &["strike", "strike_price"])?)?,
        event_timestamp: required("timestamp", f.timestamp("timestamp", TIMESTAMP)?)?,
        gamma_exposure: f.float("gamma_exposure", &["gamma_exposure", "gex"])?,
        raw: Value::Object(payload.clone()),
    })
}

/// Parse a news headline.
///
/// # Errors
///
/// Fails when the headline id, timestamp or headline text is missing.
pub fn news_item(payload: &Payload) -> Result<NewsItem, NormalizeError> {
    let f = Fields::new(payload);
    Ok(NewsItem {
        headline_id: required("headline_id", f.text("headline_id", &["headline_id", "id"])?)?,
        event_timestamp: required(
            "timestamp",
            f.timestamp("timestamp", &["timestamp", "published_at"])?,
        )?,
        headline: required("headline", f.text("headline", &["headline", "title"])?)?,
        source: f.text("source", &["source"])?,
        tickers: f
            .list("tickers", &["tickers"])?
            .into_iter()
            .map(|t| t.to_uppercase())
            .collect(),
        is_trump: f.boolean("is_trump", &["is_trump_ts", "is_trump"])?,
        raw: Value::Object(payload.clone()),
    })
}

// =============================================================================
// Tests
// =============================================================================
