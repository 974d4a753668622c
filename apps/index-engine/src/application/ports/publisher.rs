//! Snapshot Publisher Port (Driven Port)
//!
//! The engine hands every computed snapshot to a publisher. Publishing never
//! blocks the engine; slow consumers are the publisher's problem.

use std::sync::Arc;

use crate::domain::history::HistoryPoint;
use crate::domain::index::IndexSnapshot;

/// Fan-out of engine output to live subscribers.
pub trait SnapshotPublisher: Send + Sync {
    /// Publish an intraday snapshot.
    fn publish_index(&self, snapshot: Arc<IndexSnapshot>);

    /// Publish the authoritative end-of-day result for a date.
    fn publish_end_of_day(&self, snapshot: Arc<IndexSnapshot>, point: HistoryPoint);

    /// Replace the history view handed to new subscribers.
    fn replace_history(&self, history: Vec<HistoryPoint>);
}
