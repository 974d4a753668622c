//! Quote Snapshots and Last-Good-Price Book
//!
//! Per-tick price observations and the memory of the last usable price for
//! each ticker, which the calculator falls back to when a fresh quote is
//! missing or unusable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-tick price observation for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Ticker the quote belongs to.
    pub ticker: String,
    /// Last traded price.
    pub price: f64,
    /// Day open.
    pub open: f64,
    /// Day high.
    pub high: f64,
    /// Day low.
    pub low: f64,
    /// Previous session close.
    pub previous_close: f64,
    /// Observation time.
    pub as_of: DateTime<Utc>,
}

impl QuoteSnapshot {
    /// Whether the last price can be used in a calculation.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }

    /// Percent change of the last price against the previous close.
    ///
    /// Zero when the previous close is not a positive finite number.
    #[must_use]
    pub fn change_percent(&self) -> f64 {
        if self.previous_close.is_finite() && self.previous_close > 0.0 {
            (self.price - self.previous_close) / self.previous_close * 100.0
        } else {
            0.0
        }
    }
}

/// A remembered good price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    /// The quote that last passed validation.
    pub quote: QuoteSnapshot,
    /// Consecutive ticks on which no usable quote arrived.
    pub consecutive_misses: u32,
}

/// Last known good quote per ticker.
#[derive(Debug, Clone, Default)]
pub struct LastGoodPrices {
    prices: HashMap<String, PricePoint>,
}

impl LastGoodPrices {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh usable quote, resetting the miss counter.
    ///
    /// Unusable quotes are ignored.
    pub fn record(&mut self, quote: &QuoteSnapshot) {
        if !quote.is_usable() {
            return;
        }
        self.prices.insert(
            quote.ticker.clone(),
            PricePoint {
                quote: quote.clone(),
                consecutive_misses: 0,
            },
        );
    }

    /// Register a miss for `ticker` and return the new consecutive count.
    ///
    /// Returns `None` when there has never been a good price.
    pub fn record_miss(&mut self, ticker: &str) -> Option<u32> {
        self.prices.get_mut(ticker).map(|point| {
            point.consecutive_misses = point.consecutive_misses.saturating_add(1);
            point.consecutive_misses
        })
    }

    /// Last good quote for a ticker.
    #[must_use]
    pub fn get(&self, ticker: &str) -> Option<&QuoteSnapshot> {
        self.prices.get(ticker).map(|point| &point.quote)
    }

    /// Forget a ticker (used after administrative removal).
    pub fn forget(&mut self, ticker: &str) {
        self.prices.remove(ticker);
    }

    /// Number of tickers with a remembered price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether no price has been remembered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
