//! Index Repository Port (Driven Port)
//!
//! Durable storage for the divisor, the constituent set as last modified by
//! administrative changes, and the archived history.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::constituent::Constituent;
use crate::domain::divisor::DivisorState;
use crate::domain::history::HistoryPoint;

/// Persisted engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStateRecord {
    /// Divisor in force.
    pub divisor: DivisorState,
    /// Constituents after the latest administrative change.
    #[serde(default)]
    pub constituents: Option<Vec<Constituent>>,
    /// Date of the newest archived point.
    #[serde(default)]
    pub last_history_date: Option<NaiveDate>,
}

/// Everything the repository stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Engine state, absent before the first calibration.
    #[serde(default)]
    pub engine_state: Option<EngineStateRecord>,
    /// Archived history, ascending by date.
    #[serde(default)]
    pub history: Vec<HistoryPoint>,
}

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Filesystem failure.
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialized.
    #[error("repository serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable store for engine state and history.
#[async_trait]
pub trait IndexRepository: Send + Sync {
    /// Load everything stored so far.
    async fn load(&self) -> Result<PersistedIndex, RepositoryError>;

    /// Replace the stored document.
    async fn save(&self, index: &PersistedIndex) -> Result<(), RepositoryError>;
}
