//! Index Calculation
//!
//! Pure computation of an [`IndexSnapshot`] from the constituent registry,
//! the quotes of the current tick and the divisor in force.
//!
//! ```text
//! ff_mcap_i = price_i * shares_i * ff_i
//! value     = Σ ff_mcap_i / divisor
//! weight_i  = ff_mcap_i / Σ ff_mcap * 100
//! ```
//!
//! Missing or non-positive quotes fall back to the last good price and are
//! reported in `stale_tickers`. Constituents that never had a good price are
//! left out of the totals for that tick and reported in `excluded_tickers`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::constituent::ConstituentRegistry;
use super::divisor::Divisor;
use super::quote::{LastGoodPrices, QuoteSnapshot};

/// Maximum distance of the weight sum from 100, in percentage points.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

// =============================================================================
// Snapshot Types
// =============================================================================

/// Index-level figures of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexLevel {
    /// Index value.
    pub value: f64,
    /// First value of the session.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Close of the most recent archived date before this session.
    pub previous_close: f64,
    /// `value - previous_close`.
    pub change: f64,
    /// `change / previous_close * 100`.
    pub change_percent: f64,
    /// Sum of full market caps.
    pub total_market_cap: f64,
    /// Sum of free-float market caps.
    pub total_free_float_market_cap: f64,
    /// Divisor used for this value.
    pub divisor: f64,
    /// Trading date the snapshot belongs to.
    pub date: NaiveDate,
    /// Calculation time.
    pub timestamp: DateTime<Utc>,
    /// Tickers priced from the last good price.
    #[serde(default)]
    pub stale_tickers: Vec<String>,
    /// Tickers left out of this tick for lack of any good price.
    #[serde(default)]
    pub excluded_tickers: Vec<String>,
}

/// One row of the weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentWeight {
    /// Ticker.
    pub ticker: String,
    /// Company name.
    pub name: String,
    /// Sector.
    pub sector: String,
    /// Price used.
    pub price: f64,
    /// Price change against the stock's previous close, in percent.
    pub change_percent: f64,
    /// `price * shares`.
    pub market_cap: f64,
    /// `price * shares * ff`.
    pub free_float_market_cap: f64,
    /// Free-float factor.
    pub free_float_factor: f64,
    /// Shares outstanding.
    pub shares_outstanding: u64,
    /// Share of the index, in percent.
    pub weight_percent: f64,
    /// Whether `price` is a stale substitute.
    #[serde(default)]
    pub stale: bool,
}

/// Immutable result of one calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    index: IndexLevel,
    constituents: Vec<ConstituentWeight>,
}

impl IndexSnapshot {
    /// Index-level figures.
    #[must_use]
    pub const fn level(&self) -> &IndexLevel {
        &self.index
    }

    /// Weight table in registry order.
    #[must_use]
    pub fn constituents(&self) -> &[ConstituentWeight] {
        &self.constituents
    }

    /// Index value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.index.value
    }

    /// Sum of weights, in percent.
    #[must_use]
    pub fn weight_sum(&self) -> f64 {
        self.constituents.iter().map(|c| c.weight_percent).sum()
    }
}

// =============================================================================
// Session Levels
// =============================================================================

/// Running open/high/low for one trading date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLevels {
    /// Trading date.
    pub date: NaiveDate,
    /// Close the session's change is measured against.
    pub previous_close: f64,
    /// First value of the date, once a tick happened.
    pub open: Option<f64>,
    /// Highest value so far.
    pub high: Option<f64>,
    /// Lowest value so far.
    pub low: Option<f64>,
}

impl SessionLevels {
    /// Start a fresh session.
    #[must_use]
    pub const fn new(date: NaiveDate, previous_close: f64) -> Self {
        Self {
            date,
            previous_close,
            open: None,
            high: None,
            low: None,
        }
    }

    /// Levels after observing `value`.
    #[must_use]
    pub fn advance(&self, value: f64) -> Self {
        Self {
            open: Some(self.open.unwrap_or(value)),
            high: Some(self.high.map_or(value, |h| h.max(value))),
            low: Some(self.low.map_or(value, |l| l.min(value))),
            ..*self
        }
    }
}

// =============================================================================
// Price Resolution
// =============================================================================

/// A price chosen for one constituent on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrice {
    /// Quote used.
    pub quote: QuoteSnapshot,
    /// Whether it came from the last-good-price book.
    pub stale: bool,
}

/// Prices for a tick after applying the stale fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceResolution {
    /// Resolved price per ticker.
    pub prices: HashMap<String, ResolvedPrice>,
    /// Tickers priced from the book, in registry order.
    pub stale: Vec<String>,
    /// Tickers without any usable price, in registry order.
    pub excluded: Vec<String>,
}

impl PriceResolution {
    /// Resolve a price for every registry constituent.
    ///
    /// A fresh usable quote wins; otherwise the last good price is used.
    #[must_use]
    pub fn resolve(
        registry: &ConstituentRegistry,
        fresh: &HashMap<String, QuoteSnapshot>,
        fallback: &LastGoodPrices,
    ) -> Self {
        let mut resolution = Self::default();
        for constituent in registry.iter() {
            let ticker = &constituent.ticker;
            match fresh.get(ticker).filter(|q| q.is_usable()) {
                Some(quote) => {
                    resolution.prices.insert(
                        ticker.clone(),
                        ResolvedPrice {
                            quote: quote.clone(),
                            stale: false,
                        },
                    );
                }
                None => match fallback.get(ticker) {
                    Some(quote) => {
                        resolution.prices.insert(
                            ticker.clone(),
                            ResolvedPrice {
                                quote: quote.clone(),
                                stale: true,
                            },
                        );
                        resolution.stale.push(ticker.clone());
                    }
                    None => resolution.excluded.push(ticker.clone()),
                },
            }
        }
        resolution
    }

    /// Whether every registry constituent has a price.
    #[must_use]
    pub fn covers(&self, registry: &ConstituentRegistry) -> bool {
        registry.iter().all(|c| self.prices.contains_key(&c.ticker))
    }
}

// =============================================================================
// Calculator
// =============================================================================

/// Inputs for one calculation.
#[derive(Debug, Clone, Copy)]
pub struct CalculationInput<'a> {
    /// Constituents.
    pub registry: &'a ConstituentRegistry,
    /// Prices after stale fallback.
    pub prices: &'a PriceResolution,
    /// Divisor in force.
    pub divisor: &'a Divisor,
    /// Session levels before this tick.
    pub session: &'a SessionLevels,
    /// Calculation time.
    pub timestamp: DateTime<Utc>,
}

/// Pure index calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexCalculator;

impl IndexCalculator {
    /// Total free-float market cap of `registry` under `prices`.
    ///
    /// Constituents without a price contribute nothing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_free_float_market_cap(
        registry: &ConstituentRegistry,
        prices: &PriceResolution,
    ) -> f64 {
        registry
            .iter()
            .filter_map(|c| {
                prices
                    .prices
                    .get(&c.ticker)
                    .map(|p| p.quote.price * c.free_float_shares())
            })
            .sum()
    }

    /// Compute a snapshot.
    ///
    /// # Errors
    ///
    /// Fails when the registry is empty, the free-float total is not
    /// positive and finite, any derived figure is non-finite, or the weight
    /// sum misses 100 by more than [`WEIGHT_TOLERANCE`].
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate(input: CalculationInput<'_>) -> Result<IndexSnapshot, CalculationError> {
        if input.registry.is_empty() {
            return Err(CalculationError::NoConstituents);
        }

        let mut rows = Vec::with_capacity(input.registry.len());
        let mut total_ff = 0.0;
        let mut total_mcap = 0.0;

        for constituent in input.registry.iter() {
            let Some(resolved) = input.prices.prices.get(&constituent.ticker) else {
                continue;
            };
            let price = resolved.quote.price;
            let market_cap = price * constituent.shares_outstanding as f64;
            let free_float_market_cap = market_cap * constituent.free_float_factor;
            total_ff += free_float_market_cap;
            total_mcap += market_cap;
            rows.push(ConstituentWeight {
                ticker: constituent.ticker.clone(),
                name: constituent.name.clone(),
                sector: constituent.sector.clone(),
                price,
                change_percent: resolved.quote.change_percent(),
                market_cap,
                free_float_market_cap,
                free_float_factor: constituent.free_float_factor,
                shares_outstanding: constituent.shares_outstanding,
                weight_percent: 0.0,
                stale: resolved.stale,
            });
        }

        if !(total_ff.is_finite() && total_ff > 0.0) {
            return Err(CalculationError::InvalidTotal(total_ff));
        }

        for row in &mut rows {
            row.weight_percent = row.free_float_market_cap / total_ff * 100.0;
        }
        let weight_sum: f64 = rows.iter().map(|r| r.weight_percent).sum();
        if !weight_sum.is_finite() || (weight_sum - 100.0).abs() > WEIGHT_TOLERANCE {
            return Err(CalculationError::WeightSum(weight_sum));
        }

        let value = total_ff / input.divisor.value();
        let previous_close = input.session.previous_close;
        let change = value - previous_close;
        let change_percent = if previous_close > 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        };
        let session = input.session.advance(value);

        let figures = [value, change, change_percent, total_mcap];
        if figures.iter().any(|x| !x.is_finite()) {
            return Err(CalculationError::NonFinite);
        }

        Ok(IndexSnapshot {
            index: IndexLevel {
                value,
                open: session.open.unwrap_or(value),
                high: session.high.unwrap_or(value),
                low: session.low.unwrap_or(value),
                previous_close,
                change,
                change_percent,
                total_market_cap: total_mcap,
                total_free_float_market_cap: total_ff,
                divisor: input.divisor.value(),
                date: input.session.date,
                timestamp: input.timestamp,
                stale_tickers: input.prices.stale.clone(),
                excluded_tickers: input.prices.excluded.clone(),
            },
            constituents: rows,
        })
    }
}

/// Calculation failures.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CalculationError {
    /// Registry is empty.
    #[error("no constituents to calculate")]
    NoConstituents,

    /// Free-float total is zero, negative or non-finite.
    #[error("free-float market cap total is unusable: {0}")]
    InvalidTotal(f64),

    /// A derived figure is non-finite.
    #[error("calculation produced a non-finite figure")]
    NonFinite,

    /// Weights do not sum to 100 within tolerance.
    #[error("weights sum to {0}, outside tolerance")]
    WeightSum(f64),
}

// =============================================================================
// Tests
// =============================================================================
