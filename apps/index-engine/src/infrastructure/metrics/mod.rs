//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Calculation**: Tick outcomes and latency, index value, divisor
//! - **Data quality**: Stale and excluded constituents per tick
//! - **Fan-out**: Subscribers, messages published, evictions by reason
//! - **Administration**: Recalibrations and the halted flag
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns the existing handle on repeated calls, or `None` if another
/// recorder was installed first.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Calculation
    describe_counter!("index_engine_ticks_total", "Intraday ticks by outcome");
    describe_histogram!(
        "index_engine_calculation_seconds",
        "Time from quote fetch to published snapshot"
    );
    describe_gauge!("index_engine_value", "Latest published index value");
    describe_gauge!("index_engine_divisor", "Divisor in force");
    describe_counter!(
        "index_engine_eod_total",
        "End-of-day finalizations by outcome"
    );

    // Data quality
    describe_gauge!(
        "index_engine_stale_constituents",
        "Constituents priced from a stale quote in the latest tick"
    );
    describe_gauge!(
        "index_engine_excluded_constituents",
        "Constituents without any usable price in the latest tick"
    );

    // Fan-out
    describe_gauge!("index_engine_subscribers", "Connected stream subscribers");
    describe_counter!(
        "index_engine_messages_published_total",
        "Stream messages enqueued to subscribers by type"
    );
    describe_counter!(
        "index_engine_evictions_total",
        "Subscribers evicted by reason"
    );

    // Administration
    describe_counter!(
        "index_engine_recalibrations_total",
        "Divisor recalibrations by action and outcome"
    );
    describe_gauge!("index_engine_halted", "1 while the engine is halted");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed.
    Success,
    /// Failed.
    Failure,
    /// Refused because the engine is halted.
    Halted,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Halted => "halted",
        }
    }
}

/// Record an intraday tick.
pub fn record_tick(outcome: Outcome, duration: Duration) {
    counter!("index_engine_ticks_total", "outcome" => outcome.as_str()).increment(1);
    if outcome == Outcome::Success {
        histogram!("index_engine_calculation_seconds").record(duration.as_secs_f64());
    }
}

/// Record an end-of-day finalization.
pub fn record_end_of_day(outcome: Outcome) {
    counter!("index_engine_eod_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update index-level gauges from a published snapshot.
#[allow(clippy::cast_precision_loss)]
pub fn set_index_gauges(value: f64, divisor: f64, stale: usize, excluded: usize) {
    gauge!("index_engine_value").set(value);
    gauge!("index_engine_divisor").set(divisor);
    gauge!("index_engine_stale_constituents").set(stale as f64);
    gauge!("index_engine_excluded_constituents").set(excluded as f64);
}

/// Update the subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("index_engine_subscribers").set(count as f64);
}

/// Record messages enqueued to subscribers.
pub fn record_messages_published(kind: &'static str, count: u64) {
    counter!("index_engine_messages_published_total", "type" => kind).increment(count);
}

/// Record a subscriber eviction.
pub fn record_eviction(reason: &'static str) {
    counter!("index_engine_evictions_total", "reason" => reason).increment(1);
}

/// Record a recalibration attempt.
pub fn record_recalibration(action: &'static str, outcome: Outcome) {
    counter!(
        "index_engine_recalibrations_total",
        "action" => action,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the halted flag.
pub fn set_halted(halted: bool) {
    gauge!("index_engine_halted").set(if halted { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================
