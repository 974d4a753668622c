//! REST Fallback
//!
//! Fetches the engine's current level, weight table and full history over
//! HTTP. Used until the stream delivers its `initial`.

use std::time::Duration;

use index_engine::{ConstituentWeight, HistoryPoint, IndexLevel};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::reconciler::RestSnapshot;

/// Default request timeout.
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST fallback errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Request did not complete.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success status.
    #[error("{path} returned {status}: {message}")]
    Api {
        /// Request path.
        path: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Body did not match the expected shape.
    #[error("failed to parse response from {path}: {message}")]
    JsonParse {
        /// Request path.
        path: &'static str,
        /// Parse error.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    index: IndexLevel,
}

#[derive(Debug, Deserialize)]
struct ConstituentsResponse {
    constituents: Vec<ConstituentWeight>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: Vec<HistoryPoint>,
}

/// HTTP client for the engine's REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns `RestError::Client` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch everything the viewer shows.
    ///
    /// A 503 from `/api/index` means the engine has not calculated yet; the
    /// snapshot then carries history only.
    ///
    /// # Errors
    ///
    /// Returns the first request or parse failure.
    pub async fn fetch_snapshot(&self) -> Result<RestSnapshot, RestError> {
        let history = self
            .get::<HistoryResponse>("/api/history/full")
            .await?
            .history;

        let (index, constituents) = match self.get::<IndexResponse>("/api/index").await {
            Ok(response) => {
                let constituents = self
                    .get::<ConstituentsResponse>("/api/constituents")
                    .await?
                    .constituents;
                (Some(response.index), constituents)
            }
            Err(RestError::Api { status, .. })
                if status == StatusCode::SERVICE_UNAVAILABLE.as_u16() =>
            {
                tracing::debug!("Index not calculated yet, using history only");
                (None, Vec::new())
            }
            Err(e) => return Err(e),
        };

        Ok(RestSnapshot {
            index,
            constituents,
            history,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, RestError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(RestError::Api {
                path,
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| RestError::JsonParse {
            path,
            message: e.to_string(),
        })
    }
}
