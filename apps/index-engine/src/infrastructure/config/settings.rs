//! Engine Configuration Settings
//!
//! Configuration types for the index engine, loaded from environment
//! variables. Parsing goes through a key lookup function so tests can supply
//! values without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Index identity and calibration anchor.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Short index name.
    pub name: String,
    /// Full index name.
    pub full_name: String,
    /// Quote currency.
    pub currency: String,
    /// Base date for calibration.
    pub base_date: NaiveDate,
    /// Index level at the base date.
    pub base_value: f64,
    /// Path of the constituents JSON file.
    pub constituents_path: PathBuf,
    /// Path of the persisted index document (`None` keeps state in memory).
    pub data_path: Option<PathBuf>,
    /// Run a history backfill at start-up.
    pub backfill_on_start: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            name: "FFI".to_string(),
            full_name: "Free-Float Composite Index".to_string(),
            currency: "IDR".to_string(),
            base_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
            base_value: 1000.0,
            constituents_path: PathBuf::from("constituents.json"),
            data_path: Some(PathBuf::from("data/index.json")),
            backfill_on_start: true,
        }
    }
}

/// Market calendar and scheduling.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    /// Exchange offset from UTC.
    pub utc_offset: FixedOffset,
    /// Session open, local time.
    pub session_open: NaiveTime,
    /// Session close, local time.
    pub session_close: NaiveTime,
    /// End-of-day finalization time, local.
    pub eod_time: NaiveTime,
    /// Interval between intraday ticks.
    pub tick_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix()),
            session_open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            session_close: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN),
            eod_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Per-ticker quote timeout.
    pub quote_timeout: Duration,
    /// Consecutive stale ticks between warnings.
    pub stale_warn_ticks: u32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            quote_timeout: Duration::from_secs(5),
            stale_warn_ticks: 30,
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Bounded queue length per subscriber.
    pub subscriber_queue_capacity: usize,
    /// Keepalive interval expected from subscribers.
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals before eviction.
    pub max_missed_heartbeats: u32,
    /// Cap on history points in `initial`; 0 sends the full history.
    pub initial_history_points: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 64,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_heartbeats: 3,
            initial_history_points: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port for REST, WebSocket, health and metrics.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8000 }
    }
}

/// Simulated quote source settings.
#[derive(Debug, Clone, Default)]
pub struct SimulationSettings {
    /// RNG seed (`None` seeds from entropy).
    pub seed: Option<u64>,
    /// Per-step relative volatility of the random walk.
    pub volatility: f64,
}

/// Bearer token guarding the administrative endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminToken(String);

impl AdminToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Whether `candidate` matches the token.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.0.as_bytes();
        let b = candidate.as_bytes();
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken([REDACTED])")
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Index identity.
    pub index: IndexSettings,
    /// Market calendar.
    pub schedule: ScheduleSettings,
    /// Engine tuning.
    pub engine: EngineTuning,
    /// Fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Simulated quotes.
    pub simulation: SimulationSettings,
    /// Admin bearer token (`None` leaves admin endpoints open).
    pub admin_token: Option<AdminToken>,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let index_defaults = IndexSettings::default();
        let schedule_defaults = ScheduleSettings::default();
        let engine_defaults = EngineTuning::default();
        let broadcast_defaults = BroadcastSettings::default();

        let data_path = match env.get("INDEX_DATA_PATH") {
            Some(v) if v.eq_ignore_ascii_case("memory") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => index_defaults.data_path,
        };

        let index = IndexSettings {
            name: env.get("INDEX_NAME").unwrap_or(index_defaults.name),
            full_name: env.get("INDEX_FULL_NAME").unwrap_or(index_defaults.full_name),
            currency: env.get("INDEX_CURRENCY").unwrap_or(index_defaults.currency),
            base_date: env.parse_with("INDEX_BASE_DATE", index_defaults.base_date, |v| {
                NaiveDate::parse_from_str(v, "%Y-%m-%d").ok()
            })?,
            base_value: env.parse("INDEX_BASE_VALUE", index_defaults.base_value)?,
            constituents_path: env
                .get("INDEX_CONSTITUENTS_PATH")
                .map_or(index_defaults.constituents_path, PathBuf::from),
            data_path,
            backfill_on_start: env.parse("INDEX_BACKFILL_ON_START", index_defaults.backfill_on_start)?,
        };
        if !(index.base_value.is_finite() && index.base_value > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "INDEX_BASE_VALUE".to_string(),
                value: index.base_value.to_string(),
            });
        }

        let schedule = ScheduleSettings {
            utc_offset: env.parse_with("INDEX_UTC_OFFSET", schedule_defaults.utc_offset, parse_utc_offset)?,
            session_open: env.parse_with("INDEX_SESSION_OPEN", schedule_defaults.session_open, parse_clock)?,
            session_close: env.parse_with("INDEX_SESSION_CLOSE", schedule_defaults.session_close, parse_clock)?,
            eod_time: env.parse_with("INDEX_EOD_TIME", schedule_defaults.eod_time, parse_clock)?,
            tick_interval: Duration::from_secs(env.parse(
                "INDEX_TICK_INTERVAL_SECS",
                schedule_defaults.tick_interval.as_secs(),
            )?),
        };
        if schedule.session_open >= schedule.session_close {
            return Err(ConfigError::InvalidValue {
                key: "INDEX_SESSION_OPEN".to_string(),
                value: schedule.session_open.to_string(),
            });
        }
        if schedule.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "INDEX_TICK_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        let engine = EngineTuning {
            quote_timeout: Duration::from_millis(env.parse(
                "INDEX_QUOTE_TIMEOUT_MS",
                u64::try_from(engine_defaults.quote_timeout.as_millis()).unwrap_or(5000),
            )?),
            stale_warn_ticks: env.parse("INDEX_STALE_WARN_TICKS", engine_defaults.stale_warn_ticks)?,
        };

        let broadcast = BroadcastSettings {
            subscriber_queue_capacity: env
                .parse(
                    "INDEX_WS_QUEUE_CAPACITY",
                    broadcast_defaults.subscriber_queue_capacity,
                )?
                .max(1),
            heartbeat_interval: Duration::from_secs(
                env.parse(
                    "INDEX_WS_HEARTBEAT_INTERVAL_SECS",
                    broadcast_defaults.heartbeat_interval.as_secs(),
                )?
                .max(1),
            ),
            max_missed_heartbeats: env
                .parse(
                    "INDEX_WS_MAX_MISSED_HEARTBEATS",
                    broadcast_defaults.max_missed_heartbeats,
                )?
                .max(1),
            initial_history_points: env.parse(
                "INDEX_WS_HISTORY_POINTS",
                broadcast_defaults.initial_history_points,
            )?,
        };

        let server = ServerSettings {
            http_port: env.parse("INDEX_HTTP_PORT", ServerSettings::default().http_port)?,
        };

        let simulation = SimulationSettings {
            seed: env
                .get("INDEX_SIM_SEED")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "INDEX_SIM_SEED".to_string(),
                        value: v.clone(),
                    })
                })
                .transpose()?,
            volatility: env.parse("INDEX_SIM_VOLATILITY", 0.002)?,
        };

        let admin_token = env
            .get("INDEX_ADMIN_TOKEN")
            .filter(|t| !t.is_empty())
            .map(AdminToken::new);

        Ok(Self {
            index,
            schedule,
            engine,
            broadcast,
            server,
            simulation,
            admin_token,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is present but invalid.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },

    /// The constituents file could not be read.
    #[error("cannot read constituents file {path}: {source}")]
    ConstituentsFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The constituents file is not valid JSON.
    #[error("cannot parse constituents file {path}: {source}")]
    ConstituentsParse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The constituents violate registry invariants.
    #[error("invalid constituents: {0}")]
    InvalidConstituents(#[from] crate::domain::constituent::RegistryError),
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.parse_with(key, default, |v| v.parse().ok())
    }

    fn parse_with<T>(
        &self,
        key: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) if value.is_empty() => Ok(default),
            Some(value) => parse(&value).ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// Parse `+HH:MM` / `-HH:MM`.
fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => (1, value),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
