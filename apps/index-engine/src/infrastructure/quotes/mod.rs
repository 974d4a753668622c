//! Simulated Quote Source
//!
//! A seeded random-walk adapter for [`QuoteSource`], used when no market data
//! provider is wired in. Each ticker starts at its `reference_price` (or
//! [`DEFAULT_REFERENCE_PRICE`]) and moves by at most `volatility` per fetch.
//!
//! Historical closes are a pure function of `(seed, ticker, date)`, so
//! backfill produces the same history on every run with the same seed.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::application::ports::{QuoteError, QuoteSource};
use crate::domain::quote::QuoteSnapshot;
use crate::infrastructure::config::{ConstituentDefinition, SimulationSettings};

/// Starting price for tickers without a reference price.
pub const DEFAULT_REFERENCE_PRICE: f64 = 1000.0;

/// Maximum relative distance of a simulated daily close from the reference.
const DAILY_CLOSE_BAND: f64 = 0.05;

#[derive(Debug, Clone)]
struct Walk {
    reference: f64,
    price: f64,
    open: f64,
    high: f64,
    low: f64,
    previous_close: f64,
    date: NaiveDate,
}

impl Walk {
    fn start(reference: f64, date: NaiveDate) -> Self {
        Self {
            reference,
            price: reference,
            open: reference,
            high: reference,
            low: reference,
            previous_close: reference,
            date,
        }
    }

    fn roll_to(&mut self, date: NaiveDate) {
        if date != self.date {
            self.previous_close = self.price;
            self.open = self.price;
            self.high = self.price;
            self.low = self.price;
            self.date = date;
        }
    }

    fn step(&mut self, rng: &mut StdRng, volatility: f64) {
        let shock = if volatility > 0.0 {
            rng.random_range(-volatility..=volatility)
        } else {
            0.0
        };
        // Keep the walk strictly positive.
        self.price = (self.price * (1.0 + shock)).max(self.reference * 0.01);
        self.high = self.high.max(self.price);
        self.low = self.low.min(self.price);
    }
}

#[derive(Debug)]
struct SimulationState {
    rng: StdRng,
    walks: HashMap<String, Walk>,
}

/// Random-walk quote source.
#[derive(Debug)]
pub struct SimulatedQuoteSource {
    seed: u64,
    volatility: f64,
    references: HashMap<String, f64>,
    state: Mutex<SimulationState>,
}

impl SimulatedQuoteSource {
    /// Create a source seeded from the constituent definitions.
    #[must_use]
    pub fn new(definitions: &[ConstituentDefinition], settings: &SimulationSettings) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        let references = definitions
            .iter()
            .map(|d| {
                let reference = d
                    .reference_price
                    .filter(|p| p.is_finite() && *p > 0.0)
                    .unwrap_or(DEFAULT_REFERENCE_PRICE);
                (d.constituent.ticker.clone(), reference)
            })
            .collect();

        tracing::info!(
            seed,
            volatility = settings.volatility,
            tickers = definitions.len(),
            "Simulated quote source ready"
        );

        Self {
            seed,
            volatility: settings.volatility.abs(),
            references,
            state: Mutex::new(SimulationState {
                rng: StdRng::seed_from_u64(seed),
                walks: HashMap::new(),
            }),
        }
    }

    fn reference(&self, ticker: &str) -> f64 {
        self.references
            .get(ticker)
            .copied()
            .unwrap_or(DEFAULT_REFERENCE_PRICE)
    }

    fn close_on(&self, ticker: &str, date: NaiveDate) -> f64 {
        let mut rng = StdRng::seed_from_u64(mix(self.seed, ticker, date));
        self.reference(ticker) * (1.0 + rng.random_range(-DAILY_CLOSE_BAND..=DAILY_CLOSE_BAND))
    }
}

#[async_trait]
impl QuoteSource for SimulatedQuoteSource {
    async fn fetch_quote(&self, ticker: &str) -> Result<QuoteSnapshot, QuoteError> {
        if ticker.is_empty() {
            return Err(QuoteError::Unavailable {
                ticker: String::new(),
            });
        }
        let now = Utc::now();
        let today = now.date_naive();
        let reference = self.reference(ticker);

        let mut state = self.state.lock();
        let SimulationState { rng, walks } = &mut *state;
        let walk = walks
            .entry(ticker.to_string())
            .or_insert_with(|| Walk::start(reference, today));
        walk.roll_to(today);
        walk.step(rng, self.volatility);

        Ok(QuoteSnapshot {
            ticker: ticker.to_string(),
            price: walk.price,
            open: walk.open,
            high: walk.high,
            low: walk.low,
            previous_close: walk.previous_close,
            as_of: now,
        })
    }

    async fn daily_closes(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>, QuoteError> {
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .map(|d| (d, self.close_on(ticker, d)))
            .collect())
    }
}

/// Deterministic per-(ticker, date) seed.
fn mix(seed: u64, ticker: &str, date: NaiveDate) -> u64 {
    // FNV-1a over the ticker, folded with the seed and the day number.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
    for byte in ticker.bytes().chain(date.num_days_from_ce().to_le_bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
