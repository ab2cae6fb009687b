//! One-Minute Bar Aggregation
//!
//! Rolls price ticks into per-ticker one-minute OHLC bars. Exactly one bar
//! per ticker is current; it completes when a tick lands in a different
//! minute, at which point it is handed back to the caller and replaced.

use std::collections::HashMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregated one-minute price bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Underlying ticker.
    pub ticker: String,
    /// Start of the minute (inclusive).
    pub start: DateTime<Utc>,
    /// Start plus one minute (exclusive).
    pub end: DateTime<Utc>,
    /// First price in the window.
    pub open: Decimal,
    /// Highest price in the window.
    pub high: Decimal,
    /// Lowest price in the window.
    pub low: Decimal,
    /// Latest price in the window.
    pub close: Decimal,
}

impl PriceBar {
    fn open_at(ticker: &str, start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            ticker: ticker.to_string(),
            start,
            end: start + bar_width(),
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    fn apply(&mut self, price: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Result of folding one tick into the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarUpdate {
    /// Bar that closed because this tick opened a new minute.
    pub completed: Option<PriceBar>,
    /// Bar the tick was applied to.
    pub current: PriceBar,
}

/// Per-ticker one-minute bar state.
#[derive(Debug, Default)]
pub struct BarAggregator {
    bars: HashMap<String, PriceBar>,
}

impl BarAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tick into the ticker's current bar.
    ///
    /// A tick whose truncated minute differs from the current bar's start
    /// (in either direction) completes that bar and opens a new one.
    pub fn add_tick(&mut self, ticker: &str, timestamp: DateTime<Utc>, price: Decimal) -> BarUpdate {
        let start = truncate_to_minute(timestamp);

        if let Some(bar) = self.bars.get_mut(ticker)
            && bar.start == start
        {
            bar.apply(price);
            return BarUpdate {
                completed: None,
                current: bar.clone(),
            };
        }

        let current = PriceBar::open_at(ticker, start, price);
        let completed = self.bars.insert(ticker.to_string(), current.clone());
        BarUpdate { completed, current }
    }

    /// Current bar for a ticker, if one is open.
    #[must_use]
    pub fn current(&self, ticker: &str) -> Option<&PriceBar> {
        self.bars.get(ticker)
    }

    /// Number of tickers with an open bar.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether no bar is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

fn bar_width() -> TimeDelta {
    TimeDelta::minutes(1)
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(bar_width()).unwrap_or(ts)
}

// =============================================================================
// Tests
// =============================================================================
