//! Reconnection State Machine
//!
//! The stream client's connection lifecycle as an explicit state machine:
//!
//! ```text
//! Disconnected --start--> Connecting --connected--> Connected
//!                             |                         |
//!                           failed                   dropped
//!                             v                         v
//!                          Backoff <--------------------+
//!                             |
//!                      delay elapsed --> Connecting
//! ```
//!
//! Retries wait a fixed delay, optionally jittered. The attempt counter
//! resets on every successful connection; once it reaches the configured
//! maximum the machine settles in `Disconnected` and reports
//! [`NextStep::GiveUp`].

use std::time::Duration;

use rand::Rng;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Jitter as a fraction of the delay (0.1 = ±10%); 0 disables it.
    pub jitter_factor: f64,
    /// Consecutive failed attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            jitter_factor: 0.0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(delay: Duration, jitter_factor: f64, max_attempts: u32) -> Self {
        Self {
            delay,
            jitter_factor,
            max_attempts,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// Stream open.
    Connected,
    /// Waiting before the next attempt.
    Backoff,
}

impl ConnectionState {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Open a connection; `attempt` counts from 1 since the last success.
    Connect {
        /// Attempt number.
        attempt: u32,
    },
    /// Sleep, then call [`ReconnectMachine::after_backoff`].
    Wait(Duration),
    /// Attempts exhausted.
    GiveUp,
}

/// Reconnection state machine.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use index_viewer::connection::{NextStep, ReconnectConfig, ReconnectMachine};
///
/// let mut machine = ReconnectMachine::new(ReconnectConfig::new(Duration::from_secs(3), 0.0, 2));
/// assert_eq!(machine.start(), NextStep::Connect { attempt: 1 });
/// assert_eq!(machine.on_failure(), NextStep::Wait(Duration::from_secs(3)));
/// assert_eq!(machine.after_backoff(), NextStep::Connect { attempt: 2 });
/// assert_eq!(machine.on_failure(), NextStep::GiveUp);
/// ```
#[derive(Debug)]
pub struct ReconnectMachine {
    config: ReconnectConfig,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectMachine {
    /// Create a machine in `Disconnected`.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    /// Begin connecting.
    pub fn start(&mut self) -> NextStep {
        if self.state == ConnectionState::Disconnected && self.exhausted() {
            return NextStep::GiveUp;
        }
        self.begin_attempt()
    }

    /// The attempt in flight succeeded.
    pub const fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// The attempt failed or the open stream dropped.
    pub fn on_failure(&mut self) -> NextStep {
        if self.exhausted() {
            self.state = ConnectionState::Disconnected;
            return NextStep::GiveUp;
        }
        self.state = ConnectionState::Backoff;
        NextStep::Wait(self.delay())
    }

    /// The backoff delay elapsed.
    pub fn after_backoff(&mut self) -> NextStep {
        if self.state != ConnectionState::Backoff {
            return self.start();
        }
        self.begin_attempt()
    }

    /// Stop without retrying.
    pub const fn stop(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }

    fn begin_attempt(&mut self) -> NextStep {
        self.attempts += 1;
        self.state = ConnectionState::Connecting;
        NextStep::Connect {
            attempt: self.attempts,
        }
    }

    fn delay(&self) -> Duration {
        apply_jitter(self.config.delay, self.config.jitter_factor)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    #[allow(clippy::cast_precision_loss)]
    let base_millis = duration.as_millis() as f64;
    let jitter_range = base_millis * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
    let adjusted_millis = (base_millis + jitter).max(1.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let adjusted_u64 = adjusted_millis as u64;
    Duration::from_millis(adjusted_u64)
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}
