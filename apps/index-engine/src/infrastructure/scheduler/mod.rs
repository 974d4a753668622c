//! Market Calendar and Scheduler
//!
//! Drives the engine on the exchange's clock:
//!
//! - Intraday ticks every `tick_interval` while the session is open
//!   (weekdays, `session_open..=session_close` local time)
//! - One end-of-day finalization per weekday, due from `eod_time` until
//!   local midnight
//!
//! The last finalized date is recovered from the engine's newest history
//! point at start-up, so a restart after the close does not finalize twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use tokio_util::sync::CancellationToken;

use crate::application::services::{EngineError, IndexEngine};
use crate::infrastructure::config::ScheduleSettings;
use crate::infrastructure::metrics::{self, Outcome};

// =============================================================================
// Market Calendar
// =============================================================================

/// Fixed-offset exchange calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    offset: FixedOffset,
    session_open: NaiveTime,
    session_close: NaiveTime,
    eod_time: NaiveTime,
}

impl MarketCalendar {
    /// Create a calendar.
    #[must_use]
    pub const fn new(
        offset: FixedOffset,
        session_open: NaiveTime,
        session_close: NaiveTime,
        eod_time: NaiveTime,
    ) -> Self {
        Self {
            offset,
            session_open,
            session_close,
            eod_time,
        }
    }

    /// Create a calendar from schedule settings.
    #[must_use]
    pub const fn from_settings(settings: &ScheduleSettings) -> Self {
        Self::new(
            settings.utc_offset,
            settings.session_open,
            settings.session_close,
            settings.eod_time,
        )
    }

    /// Exchange offset.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local trading date at `now`.
    #[must_use]
    pub fn trading_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Whether the exchange trades on `date`.
    #[must_use]
    pub fn is_trading_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Whether intraday ticks should run at `now`.
    #[must_use]
    pub fn in_session(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        let time = local.time();
        Self::is_trading_day(local.date_naive())
            && time >= self.session_open
            && time <= self.session_close
    }

    /// The date to finalize at `now`, if its finalization is due and has not
    /// happened yet.
    #[must_use]
    pub fn eod_due(&self, now: DateTime<Utc>, last_finalized: Option<NaiveDate>) -> Option<NaiveDate> {
        let local = now.with_timezone(&self.offset);
        let date = local.date_naive();
        let due = Self::is_trading_day(date)
            && local.time() >= self.eod_time
            && last_finalized.is_none_or(|last| last < date);
        due.then_some(date)
    }

    /// Next scheduled end-of-day finalization strictly after `now`.
    #[must_use]
    pub fn next_calculation(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let mut date = local.date_naive();
        if !(Self::is_trading_day(date) && local.time() < self.eod_time) {
            date = next_trading_day(date);
        }
        self.to_utc(date, self.eod_time)
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        date.and_time(time).and_utc() - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()))
    }
}

fn next_trading_day(date: NaiveDate) -> NaiveDate {
    date.iter_days()
        .skip(1)
        .find(|d| MarketCalendar::is_trading_day(*d))
        .unwrap_or(date)
}

// =============================================================================
// Scheduler
// =============================================================================

/// What one scheduler step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// An intraday tick was attempted.
    pub ticked: bool,
    /// Date finalized in this step.
    pub finalized: Option<NaiveDate>,
}

/// Periodic driver of the engine.
pub struct IndexScheduler {
    engine: Arc<IndexEngine>,
    calendar: MarketCalendar,
    tick_interval: Duration,
    last_finalized: Option<NaiveDate>,
}

impl IndexScheduler {
    /// Create a scheduler.
    ///
    /// The last finalized date starts at the engine's newest history date.
    #[must_use]
    pub fn new(engine: Arc<IndexEngine>, calendar: MarketCalendar, tick_interval: Duration) -> Self {
        let last_finalized = engine.status().last_history_date;
        Self {
            engine,
            calendar,
            tick_interval,
            last_finalized,
        }
    }

    /// Last date finalized (or recovered from history).
    #[must_use]
    pub const fn last_finalized(&self) -> Option<NaiveDate> {
        self.last_finalized
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            next_calculation = %self.calendar.next_calculation(Utc::now()),
            last_finalized = ?self.last_finalized,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.step(Utc::now()).await;
                }
            }
        }
    }

    /// Run whatever is due at `now`.
    pub async fn step(&mut self, now: DateTime<Utc>) -> StepReport {
        let mut report = StepReport::default();

        if self.calendar.in_session(now) {
            report.ticked = true;
            let started = Instant::now();
            match self.engine.tick(now).await {
                Ok(snapshot) => {
                    let level = snapshot.level();
                    metrics::record_tick(Outcome::Success, started.elapsed());
                    metrics::set_index_gauges(
                        level.value,
                        level.divisor,
                        level.stale_tickers.len(),
                        level.excluded_tickers.len(),
                    );
                }
                Err(e) => {
                    let outcome = outcome_of(&e);
                    metrics::record_tick(outcome, started.elapsed());
                    log_failure("Intraday tick", &e);
                }
            }
        }

        if let Some(date) = self.calendar.eod_due(now, self.last_finalized) {
            match self.engine.finalize_end_of_day(date, now).await {
                Ok(_) => {
                    metrics::record_end_of_day(Outcome::Success);
                    self.last_finalized = Some(date);
                    report.finalized = Some(date);
                }
                Err(e) => {
                    metrics::record_end_of_day(outcome_of(&e));
                    log_failure("End-of-day finalization", &e);
                }
            }
        }

        metrics::set_halted(self.engine.is_halted());
        report
    }
}

const fn outcome_of(error: &EngineError) -> Outcome {
    match error {
        EngineError::Halted { .. } => Outcome::Halted,
        _ => Outcome::Failure,
    }
}

fn log_failure(what: &str, error: &EngineError) {
    match error {
        EngineError::Halted { reason } => {
            tracing::debug!(%reason, "{what} skipped, engine halted");
        }
        e => tracing::warn!(error = %e, "{what} failed"),
    }
}

// =============================================================================
// Tests
// =============================================================================
