use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

use super::*;
use crate::application::ports::{
    EngineStateRecord, MockQuoteSource, PersistedIndex, QuoteError, SnapshotPublisher,
};
use crate::domain::constituent::{Constituent, ConstituentRegistry, RegistryChange};
use crate::domain::divisor::DivisorState;
use crate::domain::history::{HistoryPoint, HistorySource};
use crate::domain::index::IndexSnapshot;
use crate::domain::quote::QuoteSnapshot;
use crate::infrastructure::persistence::InMemoryIndexRepository;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct RecordingPublisher {
    updates: Mutex<Vec<Arc<IndexSnapshot>>>,
    end_of_day: Mutex<Vec<HistoryPoint>>,
    history_replacements: Mutex<Vec<usize>>,
}

impl SnapshotPublisher for RecordingPublisher {
    fn publish_index(&self, snapshot: Arc<IndexSnapshot>) {
        self.updates.lock().push(snapshot);
    }

    fn publish_end_of_day(&self, _snapshot: Arc<IndexSnapshot>, point: HistoryPoint) {
        self.end_of_day.lock().push(point);
    }

    fn replace_history(&self, history: Vec<HistoryPoint>) {
        self.history_replacements.lock().push(history.len());
    }
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

fn wib() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).unwrap()
}

/// 10:00 local on the given date.
fn session_time(date: NaiveDate) -> DateTime<Utc> {
    wib()
        .from_local_datetime(&date.and_hms_opt(10, 0, 0).unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

fn settings() -> EngineSettings {
    EngineSettings {
        base_date: base_date(),
        base_value: 1000.0,
        quote_timeout: Duration::from_millis(200),
        stale_warn_ticks: 30,
        market_offset: wib(),
    }
}

fn registry() -> ConstituentRegistry {
    ConstituentRegistry::new(vec![
        Constituent::new("A", "Alpha", "Energy", 1_000_000, 0.5).unwrap(),
        Constituent::new("B", "Beta", "Banks", 5_000_000, 0.8).unwrap(),
        Constituent::new("C", "Gamma", "Telecom", 2_000_000, 0.6).unwrap(),
    ])
    .unwrap()
}

fn scenario_price(ticker: &str) -> Option<f64> {
    match ticker {
        "A" => Some(9000.0),
        "B" => Some(1600.0),
        "C" => Some(3000.0),
        "D" => Some(500.0),
        _ => None,
    }
}

fn quote(ticker: &str, price: f64) -> QuoteSnapshot {
    QuoteSnapshot {
        ticker: ticker.to_string(),
        price,
        open: price,
        high: price,
        low: price,
        previous_close: price,
        as_of: Utc::now(),
    }
}

/// Quote source returning scenario prices for live quotes and flat
/// scenario closes for every weekday.
fn scenario_source() -> MockQuoteSource {
    let mut source = MockQuoteSource::new();
    source.expect_fetch_quote().returning(|ticker| {
        scenario_price(ticker)
            .map(|p| quote(ticker, p))
            .ok_or_else(|| QuoteError::Unavailable {
                ticker: ticker.to_string(),
            })
    });
    source
        .expect_daily_closes()
        .returning(|ticker, from, to| Ok(flat_closes(ticker, from, to)));
    source
}

fn flat_closes(ticker: &str, from: NaiveDate, to: NaiveDate) -> BTreeMap<NaiveDate, f64> {
    use chrono::Datelike;
    let Some(price) = scenario_price(ticker) else {
        return BTreeMap::new();
    };
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| d.weekday().num_days_from_monday() < 5)
        .map(|d| (d, price))
        .collect()
}

struct Harness {
    engine: IndexEngine,
    repository: Arc<InMemoryIndexRepository>,
    publisher: Arc<RecordingPublisher>,
}

fn harness(source: MockQuoteSource, repository: InMemoryIndexRepository) -> Harness {
    let repository = Arc::new(repository);
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = IndexEngine::new(
        settings(),
        registry(),
        Arc::new(source),
        Arc::clone(&repository) as Arc<dyn crate::application::ports::IndexRepository>,
        Arc::clone(&publisher) as Arc<dyn SnapshotPublisher>,
    );
    Harness {
        engine,
        repository,
        publisher,
    }
}

// =============================================================================
// Start-up
// =============================================================================

#[tokio::test]
async fn first_start_calibrates_base_and_persists_divisor() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    let status = h.engine.status();
    assert!(status.halted.is_none());
    let divisor = status.divisor.unwrap();
    assert!((divisor.value() - 14_500_000.0).abs() < 1e-6);

    let stored = h.repository.document().engine_state.unwrap();
    assert!((stored.divisor.value - 14_500_000.0).abs() < 1e-6);
    assert_eq!(stored.constituents.unwrap().len(), 3);
    assert_eq!(*h.publisher.history_replacements.lock(), vec![0]);
}

#[tokio::test]
async fn restart_restores_divisor_without_recalibrating() {
    let document = PersistedIndex {
        engine_state: Some(EngineStateRecord {
            divisor: DivisorState {
                value: 29_000_000.0,
                last_calibrated_total_ff_mcap: 29.0e9,
                base_date: base_date(),
                base_value: 1000.0,
            },
            constituents: None,
            last_history_date: None,
        }),
        history: Vec::new(),
    };
    let mut source = MockQuoteSource::new();
    source.expect_daily_closes().never();
    source
        .expect_fetch_quote()
        .returning(|ticker| Ok(quote(ticker, scenario_price(ticker).unwrap_or(1.0))));

    let h = harness(source, InMemoryIndexRepository::with_document(document));
    h.engine.initialize().await.unwrap();

    let snapshot = h.engine.tick(session_time(base_date())).await.unwrap();
    assert!((snapshot.value() - 500.0).abs() < 1e-9);
}

#[tokio::test]
async fn rejected_persisted_divisor_halts_the_engine() {
    let document = PersistedIndex {
        engine_state: Some(EngineStateRecord {
            divisor: DivisorState {
                value: -1.0,
                last_calibrated_total_ff_mcap: 1.0,
                base_date: base_date(),
                base_value: 1000.0,
            },
            constituents: None,
            last_history_date: None,
        }),
        history: Vec::new(),
    };
    let h = harness(scenario_source(), InMemoryIndexRepository::with_document(document));

    assert!(h.engine.initialize().await.is_err());
    assert!(h.engine.is_halted());
    assert!(matches!(
        h.engine.tick(session_time(base_date())).await,
        Err(EngineError::Halted { .. })
    ));
    assert!(h.publisher.updates.lock().is_empty());
}

// =============================================================================
// Ticks
// =============================================================================

#[tokio::test]
async fn tick_publishes_scenario_snapshot() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    let snapshot = h.engine.tick(session_time(base_date())).await.unwrap();

    assert!((snapshot.value() - 1000.0).abs() < 1e-9);
    assert_eq!(snapshot.level().previous_close, 1000.0);
    assert_eq!(h.publisher.updates.lock().len(), 1);
    assert!(h.engine.current_snapshot().is_some());
    assert!(h.engine.status().last_calculated.is_some());
}

#[tokio::test]
async fn failing_quote_falls_back_to_last_good_price() {
    let healthy = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&healthy);
    let mut source = MockQuoteSource::new();
    source.expect_fetch_quote().returning(move |ticker| {
        if ticker == "B" && !flag.load(Ordering::SeqCst) {
            return Err(QuoteError::Provider {
                message: "upstream 500".to_string(),
            });
        }
        Ok(quote(ticker, scenario_price(ticker).unwrap_or(1.0)))
    });
    source
        .expect_daily_closes()
        .returning(|ticker, from, to| Ok(flat_closes(ticker, from, to)));

    let h = harness(source, InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();
    h.engine.tick(session_time(base_date())).await.unwrap();

    healthy.store(false, Ordering::SeqCst);
    let snapshot = h.engine.tick(session_time(base_date())).await.unwrap();

    assert_eq!(snapshot.level().stale_tickers, vec!["B".to_string()]);
    assert!(snapshot.level().excluded_tickers.is_empty());
    assert!((snapshot.value() - 1000.0).abs() < 1e-9);
}

#[tokio::test]
async fn session_levels_reset_on_a_new_date() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    let first = h.engine.tick(session_time(base_date())).await.unwrap();
    let next_day = base_date().succ_opt().unwrap();
    let second = h.engine.tick(session_time(next_day)).await.unwrap();

    assert_eq!(first.level().date, base_date());
    assert_eq!(second.level().date, next_day);
    assert_eq!(second.level().open, second.value());
}

// =============================================================================
// End of Day
// =============================================================================

#[tokio::test]
async fn end_of_day_archives_and_publishes_authoritative_point() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    let date = base_date();
    let point = h
        .engine
        .finalize_end_of_day(date, session_time(date))
        .await
        .unwrap();

    assert_eq!(point.source, HistorySource::EndOfDay);
    assert_eq!(point.date, date);
    assert_eq!(h.engine.history_full().len(), 1);
    assert_eq!(h.publisher.end_of_day.lock().len(), 1);
    assert_eq!(h.repository.document().history.len(), 1);
    assert_eq!(h.engine.status().last_history_date, Some(date));

    // A second finalization for the same date supersedes the first.
    let again = h
        .engine
        .finalize_end_of_day(date, session_time(date))
        .await
        .unwrap();
    assert!(again.recorded_at > point.recorded_at);
    assert_eq!(h.engine.history_full().len(), 1);
}

#[tokio::test]
async fn next_session_measures_change_from_archived_close() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();
    let date = base_date();
    h.engine
        .finalize_end_of_day(date, session_time(date))
        .await
        .unwrap();

    let next_day = date.succ_opt().unwrap();
    let snapshot = h.engine.tick(session_time(next_day)).await.unwrap();
    assert!((snapshot.level().previous_close - 1000.0).abs() < 1e-9);
    assert!(snapshot.level().change.abs() < 1e-9);
}

// =============================================================================
// Backfill
// =============================================================================

#[tokio::test]
async fn backfill_fills_weekdays_without_overwriting() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    // 2024-01-02 is a Tuesday; up to Monday 2024-01-08 exclusive of today.
    let today = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
    let report = h.engine.backfill(today).await.unwrap();

    // Tue..Fri, then Mon.
    assert_eq!(report.inserted, 5);
    assert_eq!(report.first, Some(base_date()));
    assert_eq!(report.last, NaiveDate::from_ymd_opt(2024, 1, 8));
    let history = h.engine.history_full();
    assert!(history.iter().all(|p| p.source == HistorySource::Backfill));
    assert!(history.iter().all(|p| (p.value - 1000.0).abs() < 1e-9));

    let again = h.engine.backfill(today).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(h.engine.history_full().len(), 5);
    assert_eq!(h.repository.document().history.len(), 5);
}

// =============================================================================
// Registry Changes
// =============================================================================

#[tokio::test]
async fn removing_constituent_recalibrates_and_keeps_value() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();
    let now = session_time(base_date());
    h.engine.tick(now).await.unwrap();

    let report = h
        .engine
        .apply_registry_change(
            RegistryChange::Remove {
                ticker: "C".to_string(),
            },
            now,
        )
        .await
        .unwrap();

    assert!((report.new_divisor - 10_900_000.0).abs() < 1e-3);
    assert_eq!(report.constituent_count, 2);
    let snapshot = report.snapshot.unwrap();
    assert!((snapshot.value() - 1000.0).abs() < 1e-9);
    assert_eq!(snapshot.constituents().len(), 2);

    let stored = h.repository.document().engine_state.unwrap();
    assert_eq!(stored.constituents.unwrap().len(), 2);
}

#[tokio::test]
async fn adding_constituent_without_price_is_rejected() {
    let h = harness(scenario_source(), InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();

    let err = h
        .engine
        .apply_registry_change(
            RegistryChange::Add {
                constituent: Constituent::new("ZZZ", "Zulu", "Misc", 10, 0.5).unwrap(),
            },
            session_time(base_date()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MissingPrice { .. }));
    assert!(!h.engine.is_halted());
    assert_eq!(h.engine.status().constituent_count, 3);
}

#[tokio::test]
async fn recalibration_failure_halts_until_next_successful_calibration() {
    let healthy = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&healthy);
    let mut source = MockQuoteSource::new();
    source.expect_fetch_quote().returning(move |ticker| {
        if flag.load(Ordering::SeqCst) {
            Ok(quote(ticker, scenario_price(ticker).unwrap_or(1.0)))
        } else {
            Err(QuoteError::Unavailable {
                ticker: ticker.to_string(),
            })
        }
    });
    source
        .expect_daily_closes()
        .returning(|ticker, from, to| Ok(flat_closes(ticker, from, to)));

    let h = harness(source, InMemoryIndexRepository::new());
    h.engine.initialize().await.unwrap();
    let now = session_time(base_date());

    // No live quote has ever been seen, so the pre-change total is zero.
    healthy.store(false, Ordering::SeqCst);
    let err = h
        .engine
        .apply_registry_change(
            RegistryChange::SetFreeFloat {
                ticker: "A".to_string(),
                free_float_factor: 0.4,
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Divisor(_)));
    assert!(h.engine.is_halted());
    assert!(matches!(
        h.engine.tick(now).await,
        Err(EngineError::Halted { .. })
    ));
    assert_eq!(h.engine.status().constituent_count, 3);

    healthy.store(true, Ordering::SeqCst);
    h.engine
        .apply_registry_change(
            RegistryChange::SetFreeFloat {
                ticker: "A".to_string(),
                free_float_factor: 0.4,
            },
            now,
        )
        .await
        .unwrap();
    assert!(!h.engine.is_halted());
    let snapshot = h.engine.tick(now).await.unwrap();
    assert!((snapshot.value() - 1000.0).abs() < 1e-9);
}

#[tokio::test]
async fn base_calibration_without_closes_halts() {
    let mut source = MockQuoteSource::new();
    source.expect_daily_closes().returning(|_, _, _| Ok(BTreeMap::new()));
    source.expect_fetch_quote().never();

    let h = harness(source, InMemoryIndexRepository::new());
    assert!(matches!(
        h.engine.initialize().await,
        Err(EngineError::Divisor(_))
    ));
    assert!(h.engine.is_halted());
    assert!(h.repository.document().engine_state.is_none());
}
