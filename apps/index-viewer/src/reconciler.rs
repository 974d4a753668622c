//! Client-side reconciliation of REST and stream data.
//!
//! The viewer may learn about the index from two places: a REST fallback
//! fetched while the stream is unavailable, and the stream itself. Once the
//! stream's `initial` arrives it wins; later REST results are ignored until
//! the process restarts. History is merged by date, so a date never appears
//! twice and an `eod_update` replaces whatever was known for its date.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use index_engine::{ConstituentWeight, HistoryPoint, HistorySource, IndexLevel, StreamMessage};

/// Index data fetched over REST.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestSnapshot {
    /// Current level, absent while the engine has not calculated yet.
    pub index: Option<IndexLevel>,
    /// Weight table.
    pub constituents: Vec<ConstituentWeight>,
    /// History, ascending.
    pub history: Vec<HistoryPoint>,
}

/// Where the current view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Nothing received yet.
    Empty,
    /// REST fallback only.
    Rest,
    /// Live stream.
    Stream,
}

/// What applying a message changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Stream snapshot replaced the view.
    Initial,
    /// Current level and/or constituents updated.
    Update,
    /// A date was finalized.
    EndOfDay(NaiveDate),
    /// REST data was used.
    Rest,
    /// REST data arrived after the stream took over and was dropped.
    Ignored,
}

/// Summary of the reconciled state.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Last known index value.
    pub value: Option<f64>,
    /// Last known percent change.
    pub change_percent: Option<f64>,
    /// Trading date of the last known value.
    pub date: Option<NaiveDate>,
    /// Constituents in the weight table.
    pub constituent_count: usize,
    /// Distinct history dates.
    pub history_len: usize,
    /// Latest history date.
    pub latest_history_date: Option<NaiveDate>,
    /// Stream currently connected.
    pub connected: bool,
    /// Showing last-known data without a live stream.
    pub degraded: bool,
    /// Where the data came from.
    pub source: DataSource,
    /// When the view last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Local, date-deduplicated view of the index.
#[derive(Debug, Clone)]
pub struct ClientReconciler {
    current: Option<IndexLevel>,
    constituents: Vec<ConstituentWeight>,
    history: BTreeMap<NaiveDate, HistoryPoint>,
    source: DataSource,
    connected: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for ClientReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientReconciler {
    /// Empty, disconnected view.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: None,
            constituents: Vec::new(),
            history: BTreeMap::new(),
            source: DataSource::Empty,
            connected: false,
            updated_at: None,
        }
    }

    /// Use REST data, unless the stream already initialized the view.
    pub fn apply_rest(&mut self, snapshot: RestSnapshot) -> Applied {
        if self.source == DataSource::Stream {
            return Applied::Ignored;
        }
        if snapshot.index.is_some() {
            self.current = snapshot.index;
            self.constituents = snapshot.constituents;
        }
        self.merge_history(snapshot.history);
        self.source = DataSource::Rest;
        self.touch();
        Applied::Rest
    }

    /// Apply one decoded stream message.
    pub fn apply_stream(&mut self, message: StreamMessage) -> Applied {
        let applied = match message {
            StreamMessage::Initial {
                index,
                constituents,
                history,
            } => {
                self.current = Some(index);
                self.constituents = constituents;
                self.merge_history(history);
                self.source = DataSource::Stream;
                Applied::Initial
            }
            StreamMessage::IndexUpdate {
                index,
                constituents,
                history,
            } => {
                if let Some(index) = index {
                    self.current = Some(index);
                }
                if let Some(constituents) = constituents {
                    self.constituents = constituents;
                }
                self.merge_history(history);
                Applied::Update
            }
            StreamMessage::EodUpdate {
                index,
                date,
                timestamp,
                constituents,
                history,
            } => {
                if let Some(constituents) = constituents {
                    self.constituents = constituents;
                }
                let carries_close = history.iter().any(|p| p.date == date);
                self.merge_history(history);
                if !carries_close {
                    let point = closing_point(&index, date, timestamp, self.constituents.len());
                    self.history.insert(date, point);
                }
                self.current = Some(index);
                Applied::EndOfDay(date)
            }
        };
        self.touch();
        applied
    }

    /// The stream connected.
    pub const fn on_connected(&mut self) {
        self.connected = true;
    }

    /// The stream dropped; the last known data stays visible.
    pub const fn on_disconnected(&mut self) {
        self.connected = false;
    }

    /// Last known index level.
    #[must_use]
    pub const fn current(&self) -> Option<&IndexLevel> {
        self.current.as_ref()
    }

    /// Current weight table.
    #[must_use]
    pub fn constituents(&self) -> &[ConstituentWeight] {
        &self.constituents
    }

    /// History, ascending by date.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryPoint> {
        self.history.values().cloned().collect()
    }

    /// Whether the stream's `initial` has been applied.
    #[must_use]
    pub fn is_stream_initialized(&self) -> bool {
        self.source == DataSource::Stream
    }

    /// Summary for display or logging.
    #[must_use]
    pub fn view(&self) -> ViewState {
        ViewState {
            value: self.current.as_ref().map(|l| l.value),
            change_percent: self.current.as_ref().map(|l| l.change_percent),
            date: self.current.as_ref().map(|l| l.date),
            constituent_count: self.constituents.len(),
            history_len: self.history.len(),
            latest_history_date: self.history.keys().next_back().copied(),
            connected: self.connected,
            degraded: !self.connected && self.current.is_some(),
            source: self.source,
            updated_at: self.updated_at,
        }
    }

    fn merge_history(&mut self, points: Vec<HistoryPoint>) {
        for point in points {
            self.history.insert(point.date, point);
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// History point for a close announced without one.
fn closing_point(
    index: &IndexLevel,
    date: NaiveDate,
    timestamp: i64,
    constituent_count: usize,
) -> HistoryPoint {
    HistoryPoint {
        date,
        value: index.value,
        change: index.change,
        change_percent: index.change_percent,
        open: Some(index.open),
        high: Some(index.high),
        low: Some(index.low),
        previous_close: Some(index.previous_close),
        total_free_float_market_cap: Some(index.total_free_float_market_cap),
        divisor: Some(index.divisor),
        constituent_count: (constituent_count > 0).then_some(constituent_count),
        source: HistorySource::EndOfDay,
        recorded_at: DateTime::from_timestamp_millis(timestamp).unwrap_or(index.timestamp),
    }
}
