//! Index Engine Service
//!
//! The single writer of index state. Intraday ticks, end-of-day
//! finalization, backfill and registry changes all run under one async
//! mutex, so calculation, calibration and history writes are never
//! interleaved. Read paths (REST handlers, health) use the lock-free
//! views maintained alongside the pipeline.
//!
//! # Halting
//!
//! A divisor failure (base calibration, restoration or chain-linking) puts
//! the engine into a halted state. While halted it refuses to calculate or
//! publish. A later successful calibration clears the halt.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::application::ports::{
    EngineStateRecord, IndexRepository, PersistedIndex, QuoteError, QuoteSource,
    RepositoryError, SnapshotPublisher,
};
use crate::domain::constituent::{ConstituentRegistry, RegistryChange, RegistryError};
use crate::domain::divisor::{Divisor, DivisorCalibrator, DivisorError};
use crate::domain::history::{
    HistoryError, HistoryPoint, HistorySource, HistoryStore, UpsertOutcome,
};
use crate::domain::index::{
    CalculationError, CalculationInput, IndexCalculator, IndexSnapshot, PriceResolution,
    SessionLevels,
};
use crate::domain::quote::{LastGoodPrices, QuoteSnapshot};

/// Days of closes fetched before a target date so a close can be carried
/// forward over holidays.
const CLOSE_LOOKBACK_DAYS: i64 = 14;

// =============================================================================
// Settings & Errors
// =============================================================================

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Base date for calibration.
    pub base_date: NaiveDate,
    /// Index level at the base date.
    pub base_value: f64,
    /// Per-ticker quote timeout.
    pub quote_timeout: Duration,
    /// Consecutive stale ticks between warnings.
    pub stale_warn_ticks: u32,
    /// Exchange offset used to derive the trading date.
    pub market_offset: FixedOffset,
}

/// Engine operation failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine is halted after a divisor failure.
    #[error("engine halted: {reason}")]
    Halted {
        /// Why the engine halted.
        reason: String,
    },

    /// No divisor has been calibrated yet.
    #[error("divisor has not been calibrated")]
    NotCalibrated,

    /// A constituent being added has no usable price.
    #[error("no usable price for {ticker}")]
    MissingPrice {
        /// Ticker without a price.
        ticker: String,
    },

    /// Calculation failure.
    #[error(transparent)]
    Calculation(#[from] CalculationError),

    /// Divisor failure.
    #[error(transparent)]
    Divisor(#[from] DivisorError),

    /// Invalid registry change.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// History read failure.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Quote failure.
    #[error(transparent)]
    Quote(#[from] QuoteError),
}

// =============================================================================
// Reports & Status
// =============================================================================

/// Outcome of a backfill run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    /// Dates inserted.
    pub inserted: usize,
    /// Earliest inserted date.
    pub first: Option<NaiveDate>,
    /// Latest inserted date.
    pub last: Option<NaiveDate>,
}

/// Outcome of a registry change.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalibrationReport {
    /// Divisor before the change.
    pub old_divisor: f64,
    /// Divisor after the change.
    pub new_divisor: f64,
    /// Free-float total before the change.
    pub total_ff_before: f64,
    /// Free-float total after the change.
    pub total_ff_after: f64,
    /// Constituent count after the change.
    pub constituent_count: usize,
    /// Snapshot published with the new constituent set, if one could be
    /// calculated.
    pub snapshot: Option<Arc<IndexSnapshot>>,
}

/// Read-side view of the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    /// Halt reason, if halted.
    pub halted: Option<String>,
    /// Divisor in force.
    pub divisor: Option<Divisor>,
    /// Number of constituents.
    pub constituent_count: usize,
    /// Time of the latest calculation.
    pub last_calculated: Option<DateTime<Utc>>,
    /// Latest archived date.
    pub last_history_date: Option<NaiveDate>,
}

struct Pipeline {
    registry: ConstituentRegistry,
    divisor: Option<Divisor>,
    prices: LastGoodPrices,
    session: Option<SessionLevels>,
}

// =============================================================================
// Engine
// =============================================================================

/// Single-writer index engine.
pub struct IndexEngine {
    settings: EngineSettings,
    quotes: Arc<dyn QuoteSource>,
    repository: Arc<dyn IndexRepository>,
    publisher: Arc<dyn SnapshotPublisher>,
    pipeline: Mutex<Pipeline>,
    history: RwLock<HistoryStore>,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    status: RwLock<EngineStatus>,
}

impl IndexEngine {
    /// Create an engine for the given constituents.
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        registry: ConstituentRegistry,
        quotes: Arc<dyn QuoteSource>,
        repository: Arc<dyn IndexRepository>,
        publisher: Arc<dyn SnapshotPublisher>,
    ) -> Self {
        let status = EngineStatus {
            constituent_count: registry.len(),
            ..EngineStatus::default()
        };
        Self {
            settings,
            quotes,
            repository,
            publisher,
            pipeline: Mutex::new(Pipeline {
                registry,
                divisor: None,
                prices: LastGoodPrices::new(),
                session: None,
            }),
            history: RwLock::new(HistoryStore::new()),
            current: RwLock::new(None),
            status: RwLock::new(status),
        }
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // =========================================================================
    // Start-up
    // =========================================================================

    /// Restore persisted state, or calibrate the base divisor on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be read or the divisor can
    /// neither be restored nor calibrated. Divisor failures also halt the
    /// engine.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let persisted = self.repository.load().await?;
        let mut pipeline = self.pipeline.lock().await;

        let history = HistoryStore::from_points(persisted.history);
        tracing::info!(points = history.len(), "History restored");
        *self.history.write() = history;

        match persisted.engine_state {
            Some(state) => {
                if let Some(constituents) = state.constituents {
                    match ConstituentRegistry::new(constituents) {
                        Ok(registry) => {
                            tracing::info!(
                                constituents = registry.len(),
                                "Using persisted constituent set"
                            );
                            pipeline.registry = registry;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Persisted constituents invalid, keeping configured set");
                        }
                    }
                }
                match DivisorCalibrator::restore(&state.divisor) {
                    Ok(divisor) => {
                        if divisor.base_date() != self.settings.base_date {
                            tracing::warn!(
                                persisted = %divisor.base_date(),
                                configured = %self.settings.base_date,
                                "Persisted base date differs from configuration"
                            );
                        }
                        tracing::info!(divisor = divisor.value(), "Divisor restored");
                        pipeline.divisor = Some(divisor);
                        self.clear_halt();
                    }
                    Err(e) => {
                        self.halt(format!("persisted divisor rejected: {e}"));
                        self.refresh_status(&pipeline);
                        return Err(e.into());
                    }
                }
            }
            None => {
                let divisor = self.calibrate_base(&pipeline.registry).await?;
                pipeline.divisor = Some(divisor);
                self.clear_halt();
                self.persist(&pipeline).await?;
            }
        }

        self.publisher.replace_history(self.history.read().full());
        self.refresh_status(&pipeline);
        Ok(())
    }

    async fn calibrate_base(&self, registry: &ConstituentRegistry) -> Result<Divisor, EngineError> {
        let base_date = self.settings.base_date;
        let closes = self
            .fetch_closes(
                &registry.tickers(),
                base_date - TimeDelta::days(CLOSE_LOOKBACK_DAYS),
                base_date,
            )
            .await;
        let quotes = closes_on_or_before(&closes, base_date);
        let prices = PriceResolution::resolve(registry, &quotes, &LastGoodPrices::new());
        for ticker in &prices.excluded {
            tracing::warn!(%ticker, %base_date, "No base-date close, skipped in base calibration");
        }
        let total = IndexCalculator::total_free_float_market_cap(registry, &prices);

        DivisorCalibrator::calibrate_base(total, base_date, self.settings.base_value).map_err(|e| {
            self.halt(format!("base calibration failed: {e}"));
            e.into()
        })
    }

    // =========================================================================
    // Intraday
    // =========================================================================

    /// Fetch quotes, calculate and publish one snapshot.
    ///
    /// # Errors
    ///
    /// Fails when halted, uncalibrated or when the calculation fails. A
    /// failed tick publishes nothing.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Arc<IndexSnapshot>, EngineError> {
        let mut pipeline = self.pipeline.lock().await;
        self.ensure_running()?;
        let date = self.trading_date(now);

        let fresh = self.fetch_quotes(&pipeline.registry.tickers()).await;
        let prices = self.resolve_and_record(&mut pipeline, &fresh);
        let snapshot = self.compute(&mut pipeline, &prices, date, now)?;

        self.publisher.publish_index(Arc::clone(&snapshot));
        tracing::debug!(
            value = snapshot.value(),
            stale = snapshot.level().stale_tickers.len(),
            excluded = snapshot.level().excluded_tickers.len(),
            "Tick published"
        );
        Ok(snapshot)
    }

    /// Finalize `date`: calculate from fresh quotes, archive the close and
    /// publish it as authoritative.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`Self::tick`].
    pub async fn finalize_end_of_day(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<HistoryPoint, EngineError> {
        let mut pipeline = self.pipeline.lock().await;
        self.ensure_running()?;

        let fresh = self.fetch_quotes(&pipeline.registry.tickers()).await;
        let prices = self.resolve_and_record(&mut pipeline, &fresh);
        let snapshot = self.compute(&mut pipeline, &prices, date, now)?;

        let level = snapshot.level();
        let point = {
            let mut history = self.history.write();
            let point = HistoryPoint {
                date,
                value: level.value,
                change: level.change,
                change_percent: level.change_percent,
                open: Some(level.open),
                high: Some(level.high),
                low: Some(level.low),
                previous_close: Some(level.previous_close),
                total_free_float_market_cap: Some(level.total_free_float_market_cap),
                divisor: Some(level.divisor),
                constituent_count: Some(snapshot.constituents().len()),
                source: HistorySource::EndOfDay,
                recorded_at: history.stamp_after(date, now),
            };
            let outcome = history.upsert(point.clone());
            debug_assert_ne!(outcome, UpsertOutcome::Superseded);
            point
        };

        self.publisher
            .publish_end_of_day(Arc::clone(&snapshot), point.clone());
        tracing::info!(
            %date,
            value = point.value,
            change_percent = point.change_percent,
            "End-of-day finalized"
        );

        if let Err(e) = self.persist(&pipeline).await {
            tracing::error!(error = %e, %date, "Failed to persist end-of-day point");
        }
        self.refresh_status(&pipeline);
        Ok(point)
    }

    // =========================================================================
    // Backfill
    // =========================================================================

    /// Reconstruct missing history from daily closes up to the day before
    /// `today`. Stored dates are never overwritten.
    ///
    /// # Errors
    ///
    /// Fails when halted or uncalibrated.
    pub async fn backfill(&self, today: NaiveDate) -> Result<BackfillReport, EngineError> {
        let pipeline = self.pipeline.lock().await;
        self.ensure_running()?;
        let divisor = pipeline.divisor.ok_or(EngineError::NotCalibrated)?;

        let start = self
            .history
            .read()
            .latest()
            .and_then(|p| p.date.succ_opt())
            .map_or(divisor.base_date(), |d| d.max(divisor.base_date()));
        let Some(end) = today.pred_opt() else {
            return Ok(BackfillReport::default());
        };
        if start > end {
            tracing::debug!(%start, %end, "History already up to date");
            return Ok(BackfillReport::default());
        }

        let closes = self
            .fetch_closes(
                &pipeline.registry.tickers(),
                start - TimeDelta::days(CLOSE_LOOKBACK_DAYS),
                end,
            )
            .await;
        let trading_dates: BTreeSet<NaiveDate> = closes
            .values()
            .flat_map(|series| series.range(start..=end).map(|(d, _)| *d))
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect();

        let now = Utc::now();
        let mut report = BackfillReport::default();
        {
            let mut history = self.history.write();
            for date in trading_dates {
                if history.contains(date) {
                    continue;
                }
                let quotes = closes_on_or_before(&closes, date);
                let prices =
                    PriceResolution::resolve(&pipeline.registry, &quotes, &LastGoodPrices::new());
                let priced = pipeline.registry.len() - prices.excluded.len();
                if priced == 0 {
                    continue;
                }
                let total =
                    IndexCalculator::total_free_float_market_cap(&pipeline.registry, &prices);
                let value = total / divisor.value();
                if !value.is_finite() || value <= 0.0 {
                    tracing::warn!(%date, total, "Skipping backfill date with unusable total");
                    continue;
                }
                let previous = history
                    .previous_before(date)
                    .map_or(divisor.base_value(), |p| p.value);
                let change = value - previous;
                let change_percent = if previous > 0.0 {
                    change / previous * 100.0
                } else {
                    0.0
                };

                history.insert_missing(HistoryPoint {
                    date,
                    value,
                    change,
                    change_percent,
                    open: Some(value),
                    high: Some(value),
                    low: Some(value),
                    previous_close: Some(previous),
                    total_free_float_market_cap: Some(total),
                    divisor: Some(divisor.value()),
                    constituent_count: Some(priced),
                    source: HistorySource::Backfill,
                    recorded_at: now,
                });
                report.inserted += 1;
                report.first.get_or_insert(date);
                report.last = Some(date);
            }
        }

        tracing::info!(
            inserted = report.inserted,
            first = ?report.first,
            last = ?report.last,
            "Backfill complete"
        );

        if report.inserted > 0 {
            self.publisher.replace_history(self.history.read().full());
            if let Err(e) = self.persist(&pipeline).await {
                tracing::error!(error = %e, "Failed to persist backfilled history");
            }
        }
        self.refresh_status(&pipeline);
        Ok(report)
    }

    // =========================================================================
    // Administrative Changes
    // =========================================================================

    /// Apply a constituent change and chain-link the divisor around it.
    ///
    /// Both free-float totals use the same prices, so the index value is
    /// unchanged by the change itself. A divisor failure halts the engine
    /// and leaves the registry as it was.
    ///
    /// # Errors
    ///
    /// Invalid changes are rejected without halting; divisor failures halt.
    pub async fn apply_registry_change(
        &self,
        change: RegistryChange,
        now: DateTime<Utc>,
    ) -> Result<RecalibrationReport, EngineError> {
        let mut pipeline = self.pipeline.lock().await;
        let divisor = pipeline.divisor.ok_or(EngineError::NotCalibrated)?;
        let next = pipeline.registry.with_change(&change)?;

        let tickers: Vec<String> = {
            let mut seen = HashSet::new();
            pipeline
                .registry
                .iter()
                .chain(next.iter())
                .filter(|c| seen.insert(c.ticker.clone()))
                .map(|c| c.ticker.clone())
                .collect()
        };
        let fresh = self.fetch_quotes(&tickers).await;
        for quote in fresh.values() {
            pipeline.prices.record(quote);
        }

        let before_prices = PriceResolution::resolve(&pipeline.registry, &fresh, &pipeline.prices);
        let after_prices = PriceResolution::resolve(&next, &fresh, &pipeline.prices);
        if let RegistryChange::Add { constituent } = &change
            && !after_prices.prices.contains_key(&constituent.ticker)
        {
            return Err(EngineError::MissingPrice {
                ticker: constituent.ticker.clone(),
            });
        }

        let total_ff_before =
            IndexCalculator::total_free_float_market_cap(&pipeline.registry, &before_prices);
        let total_ff_after = IndexCalculator::total_free_float_market_cap(&next, &after_prices);

        let new_divisor =
            match DivisorCalibrator::recalibrate(&divisor, total_ff_before, total_ff_after) {
                Ok(d) => d,
                Err(e) => {
                    self.halt(format!("recalibration for {} failed: {e}", change.kind()));
                    self.refresh_status(&pipeline);
                    return Err(e.into());
                }
            };

        tracing::info!(
            action = change.kind(),
            ticker = change.ticker(),
            old_divisor = divisor.value(),
            new_divisor = new_divisor.value(),
            "Constituent change applied"
        );

        pipeline.registry = next;
        pipeline.divisor = Some(new_divisor);
        if let RegistryChange::Remove { ticker } = &change {
            pipeline.prices.forget(ticker);
        }
        self.clear_halt();

        let date = self.trading_date(now);
        let snapshot = match self.compute(&mut pipeline, &after_prices, date, now) {
            Ok(snapshot) => {
                self.publisher.publish_index(Arc::clone(&snapshot));
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(error = %e, "No snapshot after constituent change");
                None
            }
        };

        if let Err(e) = self.persist(&pipeline).await {
            tracing::error!(error = %e, "Failed to persist constituent change");
        }
        self.refresh_status(&pipeline);

        Ok(RecalibrationReport {
            old_divisor: divisor.value(),
            new_divisor: new_divisor.value(),
            total_ff_before,
            total_ff_after,
            constituent_count: pipeline.registry.len(),
            snapshot,
        })
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Most recent snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.read().clone()
    }

    /// Full history, ascending.
    #[must_use]
    pub fn history_full(&self) -> Vec<HistoryPoint> {
        self.history.read().full()
    }

    /// Newest `n` history points, ascending.
    #[must_use]
    pub fn history_recent(&self, n: usize) -> Vec<HistoryPoint> {
        self.history.read().tail(n)
    }

    /// History within `from..=to`, ascending.
    ///
    /// # Errors
    ///
    /// Fails if `from > to`.
    pub fn history_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, EngineError> {
        Ok(self.history.read().range(from, to)?)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status.read().clone()
    }

    /// Whether the engine is halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.status.read().halted.is_some()
    }

    /// Fails with [`EngineError::Halted`] while the engine is halted.
    ///
    /// # Errors
    ///
    /// Returns the halt reason wrapped in `EngineError::Halted`.
    pub fn ensure_running(&self) -> Result<(), EngineError> {
        match &self.status.read().halted {
            Some(reason) => Err(EngineError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Trading date at `now` in the exchange offset.
    #[must_use]
    pub fn trading_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.settings.market_offset).date_naive()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn halt(&self, reason: String) {
        tracing::error!(%reason, "Engine halted");
        self.status.write().halted = Some(reason);
    }

    fn clear_halt(&self) {
        if self.status.write().halted.take().is_some() {
            tracing::info!("Engine halt cleared by successful calibration");
        }
    }

    fn refresh_status(&self, pipeline: &Pipeline) {
        let last_history_date = self.history.read().latest().map(|p| p.date);
        let last_calculated = self.current.read().as_ref().map(|s| s.level().timestamp);
        let mut status = self.status.write();
        status.divisor = pipeline.divisor;
        status.constituent_count = pipeline.registry.len();
        status.last_history_date = last_history_date;
        status.last_calculated = last_calculated;
    }

    /// Resolve prices for the tick and update the last-good-price book.
    fn resolve_and_record(
        &self,
        pipeline: &mut Pipeline,
        fresh: &HashMap<String, QuoteSnapshot>,
    ) -> PriceResolution {
        let prices = PriceResolution::resolve(&pipeline.registry, fresh, &pipeline.prices);
        for quote in fresh.values() {
            pipeline.prices.record(quote);
        }
        for ticker in &prices.stale {
            if let Some(misses) = pipeline.prices.record_miss(ticker)
                && self.settings.stale_warn_ticks > 0
                && misses % self.settings.stale_warn_ticks == 0
            {
                tracing::warn!(%ticker, misses, "Constituent priced from stale quote");
            }
        }
        for ticker in &prices.excluded {
            tracing::warn!(%ticker, "Constituent has no usable price, excluded this tick");
        }
        prices
    }

    fn compute(
        &self,
        pipeline: &mut Pipeline,
        prices: &PriceResolution,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Arc<IndexSnapshot>, EngineError> {
        let divisor = pipeline.divisor.ok_or(EngineError::NotCalibrated)?;
        let session = match pipeline.session {
            Some(session) if session.date == date => session,
            _ => SessionLevels::new(date, self.previous_close(date, &divisor)),
        };

        let snapshot = IndexCalculator::calculate(CalculationInput {
            registry: &pipeline.registry,
            prices,
            divisor: &divisor,
            session: &session,
            timestamp: now,
        })
        .inspect_err(|e| tracing::warn!(error = %e, %date, "Calculation failed"))?;

        pipeline.session = Some(session.advance(snapshot.value()));
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(Arc::clone(&snapshot));
        self.refresh_status(pipeline);
        Ok(snapshot)
    }

    fn previous_close(&self, date: NaiveDate, divisor: &Divisor) -> f64 {
        self.history
            .read()
            .previous_before(date)
            .map_or(divisor.base_value(), |p| p.value)
    }

    async fn fetch_quotes(&self, tickers: &[String]) -> HashMap<String, QuoteSnapshot> {
        let timeout = self.settings.quote_timeout;
        let requests = tickers.iter().map(|ticker| async move {
            let result = tokio::time::timeout(timeout, self.quotes.fetch_quote(ticker))
                .await
                .unwrap_or_else(|_| {
                    Err(QuoteError::Timeout {
                        ticker: ticker.clone(),
                    })
                });
            (ticker, result)
        });

        let mut quotes = HashMap::with_capacity(tickers.len());
        for (ticker, result) in join_all(requests).await {
            match result {
                Ok(quote) if &quote.ticker == ticker => {
                    quotes.insert(ticker.clone(), quote);
                }
                Ok(quote) => {
                    tracing::warn!(%ticker, got = %quote.ticker, "Quote ticker mismatch, ignored");
                }
                Err(e) => {
                    tracing::debug!(%ticker, error = %e, "Quote unavailable");
                }
            }
        }
        quotes
    }

    async fn fetch_closes(
        &self,
        tickers: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> HashMap<String, BTreeMap<NaiveDate, f64>> {
        let requests = tickers.iter().map(|ticker| async move {
            (ticker, self.quotes.daily_closes(ticker, from, to).await)
        });

        let mut closes = HashMap::with_capacity(tickers.len());
        for (ticker, result) in join_all(requests).await {
            match result {
                Ok(series) => {
                    closes.insert(ticker.clone(), series);
                }
                Err(e) => {
                    tracing::warn!(%ticker, error = %e, %from, %to, "Daily closes unavailable");
                }
            }
        }
        closes
    }

    async fn persist(&self, pipeline: &Pipeline) -> Result<(), RepositoryError> {
        let document = {
            let history = self.history.read();
            PersistedIndex {
                engine_state: pipeline.divisor.map(|divisor| EngineStateRecord {
                    divisor: divisor.to_state(),
                    constituents: Some(pipeline.registry.iter().cloned().collect()),
                    last_history_date: history.latest().map(|p| p.date),
                }),
                history: history.full(),
            }
        };
        self.repository.save(&document).await
    }
}

/// Quotes built from the last close on or before `date` per ticker.
fn closes_on_or_before(
    closes: &HashMap<String, BTreeMap<NaiveDate, f64>>,
    date: NaiveDate,
) -> HashMap<String, QuoteSnapshot> {
    let as_of = date.and_time(NaiveTime::MIN).and_utc();
    closes
        .iter()
        .filter_map(|(ticker, series)| {
            series.range(..=date).next_back().map(|(_, close)| {
                (
                    ticker.clone(),
                    QuoteSnapshot {
                        ticker: ticker.clone(),
                        price: *close,
                        open: *close,
                        high: *close,
                        low: *close,
                        previous_close: *close,
                        as_of,
                    },
                )
            })
        })
        .collect()
}
