//! Shared fixtures for the integration tests.
//!
//! Three constituents priced so the base calibration lands on a divisor of
//! 14,500,000 and an index value of exactly 1000.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use index_engine::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use index_engine::infrastructure::config::{AdminToken, IndexSettings, ScheduleSettings};
use index_engine::infrastructure::http::AppState;
use index_engine::infrastructure::persistence::InMemoryIndexRepository;
use index_engine::infrastructure::scheduler::MarketCalendar;
use index_engine::{
    BroadcastSettings, Constituent, ConstituentRegistry, EngineSettings, IndexEngine, QuoteError,
    QuoteSnapshot, QuoteSource, SnapshotPublisher,
};

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Quote source serving fixed prices; tickers can be added or dropped.
pub struct FixedQuotes {
    prices: Mutex<HashMap<String, f64>>,
}

impl FixedQuotes {
    pub fn scenario() -> Self {
        Self {
            prices: Mutex::new(
                [("A", 9000.0), ("B", 1600.0), ("C", 3000.0), ("D", 500.0)]
                    .into_iter()
                    .map(|(t, p)| (t.to_string(), p))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, ticker: &str, price: f64) {
        self.prices.lock().insert(ticker.to_string(), price);
    }

    pub fn remove(&self, ticker: &str) {
        self.prices.lock().remove(ticker);
    }

    fn price(&self, ticker: &str) -> Option<f64> {
        self.prices.lock().get(ticker).copied()
    }
}

#[async_trait]
impl QuoteSource for FixedQuotes {
    async fn fetch_quote(&self, ticker: &str) -> Result<QuoteSnapshot, QuoteError> {
        let price = self.price(ticker).ok_or_else(|| QuoteError::Unavailable {
            ticker: ticker.to_string(),
        })?;
        Ok(QuoteSnapshot {
            ticker: ticker.to_string(),
            price,
            open: price,
            high: price,
            low: price,
            previous_close: price,
            as_of: Utc::now(),
        })
    }

    async fn daily_closes(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>, QuoteError> {
        let Some(price) = self.price(ticker) else {
            return Ok(BTreeMap::new());
        };
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .filter(|d| d.weekday().num_days_from_monday() < 5)
            .map(|d| (d, price))
            .collect())
    }
}

pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

pub fn offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

/// 10:00 local on Wednesday 2024-01-03.
pub fn session_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_local_timezone(offset())
        .unwrap()
        .with_timezone(&Utc)
}

pub fn registry() -> ConstituentRegistry {
    ConstituentRegistry::new(vec![
        Constituent::new("A", "Alpha", "Energy", 1_000_000, 0.5).unwrap(),
        Constituent::new("B", "Beta", "Banks", 5_000_000, 0.8).unwrap(),
        Constituent::new("C", "Gamma", "Telecom", 2_000_000, 0.6).unwrap(),
    ])
    .unwrap()
}

pub struct Harness {
    pub engine: Arc<IndexEngine>,
    pub hub: Arc<BroadcastHub>,
    pub quotes: Arc<FixedQuotes>,
    pub state: Arc<AppState>,
    pub cancel: CancellationToken,
}

/// Engine with a calibrated divisor and no snapshot yet.
pub async fn harness(broadcast: BroadcastSettings) -> Harness {
    let quotes = Arc::new(FixedQuotes::scenario());
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(broadcast)));
    let engine = Arc::new(IndexEngine::new(
        EngineSettings {
            base_date: base_date(),
            base_value: 1000.0,
            quote_timeout: Duration::from_secs(1),
            stale_warn_ticks: 30,
            market_offset: offset(),
        },
        registry(),
        Arc::clone(&quotes) as Arc<dyn QuoteSource>,
        Arc::new(InMemoryIndexRepository::new()),
        Arc::clone(&hub) as Arc<dyn SnapshotPublisher>,
    ));
    tokio_test::assert_ok!(engine.initialize().await);

    let cancel = CancellationToken::new();
    let state = Arc::new(AppState::new(
        Arc::clone(&engine),
        Arc::clone(&hub),
        IndexSettings {
            base_date: base_date(),
            ..IndexSettings::default()
        },
        MarketCalendar::from_settings(&ScheduleSettings::default()),
        Some(AdminToken::new(ADMIN_TOKEN.to_string())),
        cancel.clone(),
    ));

    Harness {
        engine,
        hub,
        quotes,
        state,
        cancel,
    }
}
