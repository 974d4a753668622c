//! Stream Wire Format
//!
//! The closed set of messages sent over `/ws/index`. Every message is a JSON
//! object tagged by `type`; receivers decode once at the boundary into
//! [`StreamMessage`] and never inspect raw JSON afterwards.
//!
//! ```text
//! {"type":"initial","index":{..},"constituents":[..],"history":[..]}
//! {"type":"index_update","index":{..},"constituents":[..]}
//! {"type":"eod_update","index":{..},"date":"2024-01-02","timestamp":1704189600000,"constituents":[..],"history":[{..}]}
//! ```
//!
//! Subscribers keep the connection alive by sending the literal text
//! [`KEEPALIVE_PING`]; nothing structured is sent back.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::history::HistoryPoint;
use crate::domain::index::{ConstituentWeight, IndexLevel, IndexSnapshot};

/// Keepalive text sent by subscribers.
pub const KEEPALIVE_PING: &str = "ping";

/// Messages on the index stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// First message after accept.
    Initial {
        /// Current index level.
        index: IndexLevel,
        /// Current weight table.
        constituents: Vec<ConstituentWeight>,
        /// Recent history, ascending.
        history: Vec<HistoryPoint>,
    },

    /// Intraday update.
    IndexUpdate {
        /// New index level.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<IndexLevel>,
        /// New weight table.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constituents: Option<Vec<ConstituentWeight>>,
        /// Newly archived points, if any.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        history: Vec<HistoryPoint>,
    },

    /// Authoritative close for a date.
    EodUpdate {
        /// Closing index level.
        index: IndexLevel,
        /// Finalized date.
        date: NaiveDate,
        /// Finalization time, epoch milliseconds.
        timestamp: i64,
        /// Closing weight table.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constituents: Option<Vec<ConstituentWeight>>,
        /// The finalized point.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        history: Vec<HistoryPoint>,
    },
}

impl StreamMessage {
    /// `initial` for a snapshot and history view.
    #[must_use]
    pub fn initial(snapshot: &IndexSnapshot, history: Vec<HistoryPoint>) -> Self {
        Self::Initial {
            index: snapshot.level().clone(),
            constituents: snapshot.constituents().to_vec(),
            history,
        }
    }

    /// `index_update` carrying a full snapshot.
    #[must_use]
    pub fn index_update(snapshot: &IndexSnapshot) -> Self {
        Self::IndexUpdate {
            index: Some(snapshot.level().clone()),
            constituents: Some(snapshot.constituents().to_vec()),
            history: Vec::new(),
        }
    }

    /// `eod_update` for a finalized point.
    #[must_use]
    pub fn eod_update(snapshot: &IndexSnapshot, point: HistoryPoint) -> Self {
        Self::EodUpdate {
            index: snapshot.level().clone(),
            date: point.date,
            timestamp: point.recorded_at.timestamp_millis(),
            constituents: Some(snapshot.constituents().to_vec()),
            history: vec![point],
        }
    }

    /// Wire tag of the message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Initial { .. } => "initial",
            Self::IndexUpdate { .. } => "index_update",
            Self::EodUpdate { .. } => "eod_update",
        }
    }

    /// Serialize once for sharing across subscribers.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Arc<str>, WireError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(WireError::Encode)
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns `WireError::Decode` for malformed JSON or an unknown `type`.
pub fn decode_message(text: &str) -> Result<StreamMessage, WireError> {
    serde_json::from_str(text).map_err(WireError::Decode)
}

/// Wire errors.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization failed.
    #[error("failed to encode stream message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Incoming frame is not a valid stream message.
    #[error("malformed stream message: {0}")]
    Decode(#[source] serde_json::Error),
}
