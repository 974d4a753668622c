//! History Store
//!
//! Date-keyed archive of finalized index values. Holds at most one point per
//! date and always iterates in ascending date order.
//!
//! # Merge Policy
//!
//! Last write wins, ordered by `recorded_at`. A point recorded earlier than
//! the stored one for the same date is rejected as superseded. Equal
//! timestamps resolve in favour of the incoming write. End-of-day
//! finalization uses [`HistoryStore::stamp_after`] so its point always
//! supersedes provisional data for the same date.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a history point was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    /// Reconstructed from historical closes.
    Backfill,
    /// Finalized at end of day.
    EndOfDay,
}

/// One archived trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Trading date (unique key).
    pub date: NaiveDate,
    /// Closing index value.
    pub value: f64,
    /// Change against the preceding point.
    pub change: f64,
    /// Percent change against the preceding point.
    pub change_percent: f64,
    /// Session open.
    #[serde(default)]
    pub open: Option<f64>,
    /// Session high.
    #[serde(default)]
    pub high: Option<f64>,
    /// Session low.
    #[serde(default)]
    pub low: Option<f64>,
    /// Close the change was measured against.
    #[serde(default)]
    pub previous_close: Option<f64>,
    /// Total free-float market cap at close.
    #[serde(default)]
    pub total_free_float_market_cap: Option<f64>,
    /// Divisor at close.
    #[serde(default)]
    pub divisor: Option<f64>,
    /// Constituents priced at close.
    #[serde(default)]
    pub constituent_count: Option<usize>,
    /// Origin of the point.
    pub source: HistorySource,
    /// When the point was written.
    pub recorded_at: DateTime<Utc>,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New date.
    Inserted,
    /// Replaced the stored point for the date.
    Replaced,
    /// Identical to the stored point.
    Unchanged,
    /// Older than the stored point; not applied.
    Superseded,
}

impl UpsertOutcome {
    /// Whether the store changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// History read failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// `from` is after `to`.
    #[error("invalid range: {from} is after {to}")]
    InvalidRange {
        /// Range start.
        from: NaiveDate,
        /// Range end.
        to: NaiveDate,
    },
}

/// Ordered, date-unique history.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    points: BTreeMap<NaiveDate, HistoryPoint>,
}

impl HistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded points, applying the merge policy.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = HistoryPoint>) -> Self {
        let mut store = Self::new();
        for point in points {
            store.upsert(point);
        }
        store
    }

    /// Insert or replace the point for its date.
    pub fn upsert(&mut self, point: HistoryPoint) -> UpsertOutcome {
        match self.points.get(&point.date) {
            None => {
                self.points.insert(point.date, point);
                UpsertOutcome::Inserted
            }
            Some(existing) if *existing == point => UpsertOutcome::Unchanged,
            Some(existing) if point.recorded_at < existing.recorded_at => {
                UpsertOutcome::Superseded
            }
            Some(_) => {
                self.points.insert(point.date, point);
                UpsertOutcome::Replaced
            }
        }
    }

    /// Insert only if the date is not stored yet.
    ///
    /// Returns whether the point was inserted.
    pub fn insert_missing(&mut self, point: HistoryPoint) -> bool {
        if self.points.contains_key(&point.date) {
            return false;
        }
        self.points.insert(point.date, point);
        true
    }

    /// A `recorded_at` that sorts strictly after any stored point for `date`.
    #[must_use]
    pub fn stamp_after(&self, date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.points.get(&date) {
            Some(existing) if existing.recorded_at >= now => {
                existing.recorded_at + Duration::microseconds(1)
            }
            _ => now,
        }
    }

    /// Points with `from <= date <= to`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::InvalidRange` if `from > to`.
    pub fn range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<HistoryPoint>, HistoryError> {
        if from > to {
            return Err(HistoryError::InvalidRange { from, to });
        }
        Ok(self.points.range(from..=to).map(|(_, p)| p.clone()).collect())
    }

    /// All points, ascending.
    #[must_use]
    pub fn full(&self) -> Vec<HistoryPoint> {
        self.points.values().cloned().collect()
    }

    /// Newest `n` points, ascending.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<HistoryPoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.values().skip(skip).cloned().collect()
    }

    /// Newest point.
    #[must_use]
    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.values().next_back()
    }

    /// Newest point strictly before `date`.
    #[must_use]
    pub fn previous_before(&self, date: NaiveDate) -> Option<&HistoryPoint> {
        self.points.range(..date).next_back().map(|(_, p)| p)
    }

    /// Point for a date.
    #[must_use]
    pub fn get(&self, date: NaiveDate) -> Option<&HistoryPoint> {
        self.points.get(&date)
    }

    /// Whether a date is stored.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.points.contains_key(&date)
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
