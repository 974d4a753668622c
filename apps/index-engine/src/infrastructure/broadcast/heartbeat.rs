//! Subscriber Keepalive Tracking
//!
//! Each stream connection owns a [`KeepaliveTracker`]. Any inbound frame,
//! including the literal `ping` keepalive, counts as activity. The
//! connection task calls [`KeepaliveTracker::on_interval`] once per
//! heartbeat interval and closes the subscriber after too many silent
//! intervals in a row.

use std::time::{Duration, Instant};

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Length of one heartbeat interval.
    pub interval: Duration,
    /// Consecutive silent intervals tolerated before the subscriber is dropped.
    pub max_missed: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed: 3,
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval,
            max_missed,
        }
    }

    /// Time a subscriber may stay silent before it is expired.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.max_missed.max(1))
    }
}

/// Result of an interval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveStatus {
    /// The subscriber has been heard from recently enough.
    Alive {
        /// Silent intervals so far.
        missed: u32,
    },
    /// The subscriber missed `max_missed` intervals in a row.
    Expired,
}

/// Per-connection keepalive state.
#[derive(Debug)]
pub struct KeepaliveTracker {
    config: KeepaliveConfig,
    last_activity: Instant,
    active_this_interval: bool,
    missed: u32,
}

impl KeepaliveTracker {
    /// Create a tracker that considers the subscriber alive right now.
    #[must_use]
    pub fn new(config: KeepaliveConfig) -> Self {
        Self {
            config,
            last_activity: Instant::now(),
            active_this_interval: true,
            missed: 0,
        }
    }

    /// Record that any frame arrived from the subscriber.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.active_this_interval = true;
        self.missed = 0;
    }

    /// Close out one heartbeat interval.
    pub fn on_interval(&mut self) -> KeepaliveStatus {
        if self.active_this_interval {
            self.active_this_interval = false;
            self.missed = 0;
            return KeepaliveStatus::Alive { missed: 0 };
        }

        self.missed = self.missed.saturating_add(1);
        if self.missed >= self.config.max_missed.max(1) {
            KeepaliveStatus::Expired
        } else {
            KeepaliveStatus::Alive {
                missed: self.missed,
            }
        }
    }

    /// Silent intervals in a row.
    #[must_use]
    pub const fn missed(&self) -> u32 {
        self.missed
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// The configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval
    }
}
