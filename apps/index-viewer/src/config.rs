//! Viewer configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::connection::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, ReconnectConfig};
use crate::rest::DEFAULT_REST_TIMEOUT;

/// Default engine address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Stream path on the engine.
pub const STREAM_PATH: &str = "/ws/index";

/// Viewer settings.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Engine base URL, `http://` or `https://`.
    pub base_url: String,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Timeout for opening the stream.
    pub connect_timeout: Duration,
    /// Timeout for REST requests.
    pub rest_timeout: Duration,
    /// Retry policy.
    pub reconnect: ReconnectConfig,
    /// Interval between view summaries in the log.
    pub log_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            rest_timeout: DEFAULT_REST_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            log_interval: Duration::from_secs(10),
        }
    }
}

impl ViewerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ViewerConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ViewerConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let base_url = get("INDEX_VIEWER_BASE_URL").unwrap_or(defaults.base_url);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ViewerConfigError::InvalidValue {
                key: "INDEX_VIEWER_BASE_URL".to_string(),
                value: base_url,
            });
        }

        let secs = |key: &str, default: Duration| -> Result<Duration, ViewerConfigError> {
            parse(key, get(key), default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ping_interval: secs("INDEX_VIEWER_PING_SECS", defaults.ping_interval)?,
            connect_timeout: secs("INDEX_VIEWER_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            rest_timeout: secs("INDEX_VIEWER_REST_TIMEOUT_SECS", defaults.rest_timeout)?,
            reconnect: ReconnectConfig {
                delay: secs("INDEX_VIEWER_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY)?,
                jitter_factor: parse(
                    "INDEX_VIEWER_RETRY_JITTER",
                    get("INDEX_VIEWER_RETRY_JITTER"),
                    0.0,
                )?,
                max_attempts: parse(
                    "INDEX_VIEWER_MAX_ATTEMPTS",
                    get("INDEX_VIEWER_MAX_ATTEMPTS"),
                    DEFAULT_MAX_ATTEMPTS,
                )?,
            },
            log_interval: secs("INDEX_VIEWER_LOG_INTERVAL_SECS", defaults.log_interval)?,
        })
    }

    /// WebSocket URL of the index stream.
    #[must_use]
    pub fn stream_url(&self) -> String {
        let ws_base = self
            .base_url
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| {
                self.base_url
                    .strip_prefix("http://")
                    .map(|rest| format!("ws://{rest}"))
            })
            .unwrap_or_else(|| self.base_url.clone());
        format!("{ws_base}{STREAM_PATH}")
    }
}

fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ViewerConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ViewerConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ViewerConfigError {
    /// A variable is present but invalid.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}
