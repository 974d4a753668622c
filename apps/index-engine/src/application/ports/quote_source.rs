//! Quote Source Port (Driven Port)
//!
//! Supplies prices for the constituents. Provider-specific retry and rate
//! limiting belong to the adapter, never to the engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::quote::QuoteSnapshot;

/// Quote acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    /// The provider has no quote for the ticker.
    #[error("no quote available for {ticker}")]
    Unavailable {
        /// Requested ticker.
        ticker: String,
    },

    /// The request did not complete in time.
    #[error("quote request for {ticker} timed out")]
    Timeout {
        /// Requested ticker.
        ticker: String,
    },

    /// Provider-side failure.
    #[error("quote provider error: {message}")]
    Provider {
        /// Error details.
        message: String,
    },
}

/// Source of price snapshots and historical closes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Current price snapshot for one ticker.
    async fn fetch_quote(&self, ticker: &str) -> Result<QuoteSnapshot, QuoteError>;

    /// Daily closing prices for one ticker over `from..=to`.
    ///
    /// Dates without trading are simply absent from the map.
    async fn daily_closes(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>, QuoteError>;
}
