//! Broadcast Hub
//!
//! Fans engine output out to stream subscribers.
//!
//! # Architecture
//!
//! Every subscriber owns a bounded `mpsc` queue of pre-serialized frames.
//! Publication serializes each message once, then `try_send`s the shared
//! `Arc<str>` into every queue:
//!
//! - A full queue evicts that subscriber (slow consumer)
//! - A closed queue evicts that subscriber (connection task gone)
//!
//! Publication never awaits, so one stuck subscriber cannot delay the engine
//! or the other subscribers. Dropping the queue sender is how eviction
//! reaches the connection task: its `recv()` returns `None` and it closes the
//! socket.
//!
//! The `initial` message is built and enqueued under the same lock that
//! guards publication, so no update can slip between a subscriber's
//! `initial` and its first live update.

pub mod heartbeat;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::SnapshotPublisher;
use crate::domain::history::{HistoryPoint, HistoryStore};
use crate::domain::index::IndexSnapshot;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::wire::StreamMessage;

pub use heartbeat::{KeepaliveConfig, KeepaliveStatus, KeepaliveTracker};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the hub and its subscriber connections.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Bounded queue length per subscriber.
    pub subscriber_queue_capacity: usize,
    /// Keepalive interval expected from subscribers.
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals before eviction.
    pub max_missed_heartbeats: u32,
    /// Cap on history points in `initial`; 0 sends the full history.
    pub initial_history_points: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastSettings::default().into()
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            subscriber_queue_capacity: settings.subscriber_queue_capacity,
            heartbeat_interval: settings.heartbeat_interval,
            max_missed_heartbeats: settings.max_missed_heartbeats,
            initial_history_points: settings.initial_history_points,
        }
    }
}

impl BroadcastConfig {
    /// Keepalive configuration for one connection.
    #[must_use]
    pub const fn keepalive(&self) -> KeepaliveConfig {
        KeepaliveConfig::new(self.heartbeat_interval, self.max_missed_heartbeats)
    }
}

// =============================================================================
// Subscribers
// =============================================================================

/// Unique subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a new random subscriber ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a subscriber left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Queue was full at publication.
    SlowConsumer,
    /// Queue receiver was dropped.
    Disconnected,
    /// Too many silent keepalive intervals.
    HeartbeatTimeout,
    /// Subscriber closed the socket.
    ClientClosed,
    /// Writing to the socket failed.
    SendFailed,
    /// Process shutdown.
    Shutdown,
}

impl EvictionReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlowConsumer => "slow_consumer",
            Self::Disconnected => "disconnected",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ClientClosed => "client_closed",
            Self::SendFailed => "send_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered subscriber's end of its queue.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber identifier.
    pub id: SubscriberId,
    /// Serialized frames, in publication order.
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Outcome of one publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the frame.
    pub delivered: usize,
    /// Subscribers evicted during this publication.
    pub evicted: usize,
}

/// Hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Frames enqueued since start.
    pub messages_published: u64,
    /// Evictions since start.
    pub evictions: u64,
}

#[derive(Debug)]
struct SubscriberEntry {
    sender: mpsc::Sender<Arc<str>>,
    initialized: bool,
}

#[derive(Debug, Default)]
struct HubState {
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    current: Option<Arc<IndexSnapshot>>,
    history: HistoryStore,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central fan-out point for index snapshots.
///
/// # Example
///
/// ```rust
/// use index_engine::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let subscription = hub.subscribe();
/// assert_eq!(hub.subscriber_count(), 1);
/// hub.unsubscribe(subscription.id);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    state: Mutex<HubState>,
    messages_published: AtomicU64,
    evictions: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HubState::default()),
            messages_published: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Hub configuration.
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Register a subscriber.
    ///
    /// When a snapshot exists, `initial` is already queued when this returns.
    /// Otherwise the subscriber receives `initial` with the first snapshot.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId::new();
        let (sender, receiver) = mpsc::channel(self.config.subscriber_queue_capacity.max(1));

        let mut state = self.state.lock();
        let mut initialized = false;
        if let Some(frame) = self.initial_frame(&state) {
            // Fresh queue with capacity >= 1 always has room.
            initialized = sender.try_send(frame).is_ok();
            if initialized {
                self.count_published("initial", 1);
            }
        }
        state.subscribers.insert(
            id,
            SubscriberEntry {
                sender,
                initialized,
            },
        );
        let count = state.subscribers.len();
        drop(state);

        metrics::set_subscribers(count);
        tracing::info!(subscriber_id = %id, subscribers = count, "Subscriber connected");
        Subscription { id, receiver }
    }

    /// Remove a subscriber that left on its own.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.evict(id, EvictionReason::ClientClosed)
    }

    /// Remove a subscriber, dropping its queue sender.
    ///
    /// Returns `false` if it was already gone.
    pub fn evict(&self, id: SubscriberId, reason: EvictionReason) -> bool {
        let (removed, count) = {
            let mut state = self.state.lock();
            let removed = state.subscribers.remove(&id).is_some();
            (removed, state.subscribers.len())
        };
        if removed {
            self.count_eviction(id, reason);
            metrics::set_subscribers(count);
        }
        removed
    }

    /// Drop every subscriber.
    pub fn close_all(&self) {
        let ids: Vec<SubscriberId> = self.state.lock().subscribers.drain().map(|(id, _)| id).collect();
        for id in ids {
            self.count_eviction(id, EvictionReason::Shutdown);
        }
        metrics::set_subscribers(0);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.state.lock().current.clone()
    }

    /// Hub counters.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Install a snapshot and send it as `index_update`.
    pub fn publish_snapshot(&self, snapshot: Arc<IndexSnapshot>) -> PublishReport {
        let message = StreamMessage::index_update(&snapshot);
        let mut state = self.state.lock();
        state.current = Some(snapshot);
        self.fan_out(&mut state, &message)
    }

    /// Install a closing snapshot, archive its point, and send `eod_update`.
    pub fn publish_close(&self, snapshot: Arc<IndexSnapshot>, point: HistoryPoint) -> PublishReport {
        let message = StreamMessage::eod_update(&snapshot, point.clone());
        let mut state = self.state.lock();
        state.history.upsert(point);
        state.current = Some(snapshot);
        self.fan_out(&mut state, &message)
    }

    /// Swap in a new history view.
    ///
    /// Points that are new or changed go out as incremental history on an
    /// `index_update`, once a snapshot exists.
    pub fn install_history(&self, history: Vec<HistoryPoint>) -> PublishReport {
        let mut state = self.state.lock();
        let changed: Vec<HistoryPoint> = history
            .iter()
            .filter(|p| state.history.get(p.date) != Some(*p))
            .cloned()
            .collect();
        state.history = HistoryStore::from_points(history);

        let Some(current) = state.current.clone() else {
            return PublishReport::default();
        };
        if changed.is_empty() {
            return PublishReport::default();
        }
        let message = StreamMessage::IndexUpdate {
            index: Some(current.level().clone()),
            constituents: None,
            history: changed,
        };
        self.fan_out(&mut state, &message)
    }

    fn initial_frame(&self, state: &HubState) -> Option<Arc<str>> {
        let current = state.current.as_ref()?;
        let history = match self.config.initial_history_points {
            0 => state.history.full(),
            cap => state.history.tail(cap),
        };
        match StreamMessage::initial(current, history).encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode initial message");
                None
            }
        }
    }

    fn fan_out(&self, state: &mut HubState, message: &StreamMessage) -> PublishReport {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "Failed to encode stream message");
                return PublishReport::default();
            }
        };
        let needs_initial = state.subscribers.values().any(|s| !s.initialized);
        let initial = if needs_initial {
            self.initial_frame(state)
        } else {
            None
        };

        let mut report = PublishReport::default();
        let mut initial_sent = 0_u64;
        let mut evicted = Vec::new();

        for (id, subscriber) in &mut state.subscribers {
            let outgoing = if subscriber.initialized {
                Arc::clone(&frame)
            } else {
                match &initial {
                    Some(initial) => Arc::clone(initial),
                    None => continue,
                }
            };
            match subscriber.sender.try_send(outgoing) {
                Ok(()) => {
                    if subscriber.initialized {
                        report.delivered += 1;
                    } else {
                        subscriber.initialized = true;
                        initial_sent += 1;
                        report.delivered += 1;
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    evicted.push((*id, EvictionReason::SlowConsumer));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push((*id, EvictionReason::Disconnected));
                }
            }
        }

        for (id, reason) in &evicted {
            state.subscribers.remove(id);
            self.count_eviction(*id, *reason);
        }
        report.evicted = evicted.len();

        let plain = report.delivered as u64 - initial_sent;
        self.count_published(message.kind(), plain);
        self.count_published("initial", initial_sent);
        if report.evicted > 0 {
            metrics::set_subscribers(state.subscribers.len());
        }

        tracing::debug!(
            kind = message.kind(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Published stream message"
        );
        report
    }

    fn count_published(&self, kind: &'static str, count: u64) {
        if count == 0 {
            return;
        }
        self.messages_published.fetch_add(count, Ordering::Relaxed);
        metrics::record_messages_published(kind, count);
    }

    fn count_eviction(&self, id: SubscriberId, reason: EvictionReason) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::record_eviction(reason.as_str());
        match reason {
            EvictionReason::SlowConsumer | EvictionReason::HeartbeatTimeout => {
                tracing::warn!(subscriber_id = %id, reason = %reason, "Subscriber evicted");
            }
            _ => {
                tracing::info!(subscriber_id = %id, reason = %reason, "Subscriber removed");
            }
        }
    }
}

impl SnapshotPublisher for BroadcastHub {
    fn publish_index(&self, snapshot: Arc<IndexSnapshot>) {
        self.publish_snapshot(snapshot);
    }

    fn publish_end_of_day(&self, snapshot: Arc<IndexSnapshot>, point: HistoryPoint) {
        self.publish_close(snapshot, point);
    }

    fn replace_history(&self, history: Vec<HistoryPoint>) {
        self.install_history(history);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::domain::constituent::{Constituent, ConstituentRegistry};
    use crate::domain::divisor::{DEFAULT_BASE_VALUE, DivisorCalibrator};
    use crate::domain::history::HistorySource;
    use crate::domain::index::{CalculationInput, IndexCalculator, PriceResolution, SessionLevels};
    use crate::domain::quote::{LastGoodPrices, QuoteSnapshot};
    use crate::infrastructure::wire::decode_message;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
    }

    fn snapshot(price: f64) -> Arc<IndexSnapshot> {
        let registry = ConstituentRegistry::new(vec![
            Constituent::new("A", "Alpha", "Energy", 1_000_000, 0.5).unwrap(),
        ])
        .unwrap();
        let quotes: HashMap<String, QuoteSnapshot> = [(
            "A".to_string(),
            QuoteSnapshot {
                ticker: "A".to_string(),
                price,
                open: price,
                high: price,
                low: price,
                previous_close: price,
                as_of: Utc::now(),
            },
        )]
        .into_iter()
        .collect();
        let prices = PriceResolution::resolve(&registry, &quotes, &LastGoodPrices::new());
        let divisor = DivisorCalibrator::calibrate_base(4.5e9, date(), DEFAULT_BASE_VALUE).unwrap();
        let session = SessionLevels::new(date(), DEFAULT_BASE_VALUE);
        Arc::new(
            IndexCalculator::calculate(CalculationInput {
                registry: &registry,
                prices: &prices,
                divisor: &divisor,
                session: &session,
                timestamp: Utc::now(),
            })
            .unwrap(),
        )
    }

    fn point(day: u32, value: f64) -> HistoryPoint {
        HistoryPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            value,
            change: 0.0,
            change_percent: 0.0,
            open: None,
            high: None,
            low: None,
            previous_close: None,
            total_free_float_market_cap: None,
            divisor: None,
            constituent_count: None,
            source: HistorySource::EndOfDay,
            recorded_at: Utc::now(),
        }
    }

    fn hub(capacity: usize) -> BroadcastHub {
        BroadcastHub::new(BroadcastConfig {
            subscriber_queue_capacity: capacity,
            ..BroadcastConfig::default()
        })
    }

    fn next_kind(subscription: &mut Subscription) -> &'static str {
        let frame = subscription.receiver.try_recv().unwrap();
        decode_message(&frame).unwrap().kind()
    }

    #[test]
    fn subscriber_before_first_snapshot_gets_initial_with_it() {
        let hub = hub(4);
        let mut subscription = hub.subscribe();
        assert!(subscription.receiver.try_recv().is_err());

        hub.publish_snapshot(snapshot(9000.0));
        assert_eq!(next_kind(&mut subscription), "initial");

        hub.publish_snapshot(snapshot(9100.0));
        assert_eq!(next_kind(&mut subscription), "index_update");
    }

    #[test]
    fn initial_is_first_frame_when_snapshot_exists() {
        let hub = hub(4);
        hub.install_history(vec![point(2, 1000.0)]);
        hub.publish_snapshot(snapshot(9000.0));

        let mut subscription = hub.subscribe();
        hub.publish_snapshot(snapshot(9100.0));

        let first = subscription.receiver.try_recv().unwrap();
        match decode_message(&first).unwrap() {
            StreamMessage::Initial { history, constituents, .. } => {
                assert_eq!(history.len(), 1);
                assert_eq!(constituents.len(), 1);
            }
            other => panic!("expected initial, got {}", other.kind()),
        }
        assert_eq!(next_kind(&mut subscription), "index_update");
    }

    fn long_history(len: u32) -> Vec<HistoryPoint> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..len)
            .map(|i| HistoryPoint {
                date: start + chrono::Duration::days(i64::from(i)),
                ..point(2, 1000.0 + f64::from(i))
            })
            .collect()
    }

    fn initial_history_len(hub: &BroadcastHub) -> usize {
        let mut subscription = hub.subscribe();
        let first = subscription.receiver.try_recv().unwrap();
        match decode_message(&first).unwrap() {
            StreamMessage::Initial { history, .. } => history.len(),
            other => panic!("expected initial, got {}", other.kind()),
        }
    }

    #[test]
    fn initial_carries_full_history_by_default() {
        let hub = hub(4);
        hub.install_history(long_history(150));
        hub.publish_snapshot(snapshot(9000.0));

        assert_eq!(initial_history_len(&hub), 150);
    }

    #[test]
    fn initial_history_cap_is_opt_in() {
        let hub = BroadcastHub::new(BroadcastConfig {
            initial_history_points: 100,
            ..BroadcastConfig::default()
        });
        hub.install_history(long_history(150));
        hub.publish_snapshot(snapshot(9000.0));

        assert_eq!(initial_history_len(&hub), 100);
    }

    #[test]
    fn full_queue_evicts_only_the_stuck_subscriber() {
        let hub = hub(2);
        let mut readers: Vec<Subscription> = (0..3).map(|_| hub.subscribe()).collect();
        let stuck = hub.subscribe();

        let mut last = PublishReport::default();
        for price in [9000.0, 9050.0, 9100.0] {
            last = hub.publish_snapshot(snapshot(price));
            for reader in &mut readers {
                while reader.receiver.try_recv().is_ok() {}
            }
        }

        assert_eq!(last, PublishReport { delivered: 3, evicted: 1 });
        assert_eq!(hub.subscriber_count(), 3);
        assert_eq!(hub.stats().evictions, 1);
        assert!(!hub.evict(stuck.id, EvictionReason::SlowConsumer));
    }

    #[test]
    fn dropped_receiver_is_evicted_as_disconnected() {
        let hub = hub(4);
        let subscription = hub.subscribe();
        drop(subscription);

        let report = hub.publish_snapshot(snapshot(9000.0));
        assert_eq!(report, PublishReport { delivered: 0, evicted: 1 });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn eviction_closes_the_queue() {
        let hub = hub(4);
        let mut subscription = hub.subscribe();
        assert!(hub.evict(subscription.id, EvictionReason::HeartbeatTimeout));
        assert!(matches!(
            subscription.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn end_of_day_is_archived_for_later_subscribers() {
        let hub = hub(4);
        hub.publish_snapshot(snapshot(9000.0));
        hub.publish_close(snapshot(9000.0), point(3, 1000.0));

        let mut subscription = hub.subscribe();
        let frame = subscription.receiver.try_recv().unwrap();
        match decode_message(&frame).unwrap() {
            StreamMessage::Initial { history, .. } => {
                assert_eq!(history.last().map(|p| p.date), Some(date()));
            }
            other => panic!("expected initial, got {}", other.kind()),
        }
    }

    #[test]
    fn replaced_history_sends_only_changed_points() {
        let hub = hub(4);
        hub.install_history(vec![point(2, 1000.0)]);
        hub.publish_snapshot(snapshot(9000.0));
        let mut subscription = hub.subscribe();
        assert_eq!(next_kind(&mut subscription), "initial");

        let kept = hub.state.lock().history.full();
        let mut history = kept;
        history.push(point(3, 1010.0));
        let report = hub.install_history(history);
        assert_eq!(report.delivered, 1);

        let frame = subscription.receiver.try_recv().unwrap();
        match decode_message(&frame).unwrap() {
            StreamMessage::IndexUpdate { history, index, .. } => {
                assert!(index.is_some());
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].value, 1010.0);
            }
            other => panic!("expected index_update, got {}", other.kind()),
        }

        let unchanged = hub.state.lock().history.full();
        assert_eq!(hub.install_history(unchanged), PublishReport::default());
    }

    #[test]
    fn close_all_drops_every_queue() {
        let hub = hub(4);
        let mut a = hub.subscribe();
        let _b = hub.subscribe();
        hub.close_all();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(a.receiver.try_recv().is_err());
    }
}
