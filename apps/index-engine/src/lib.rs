#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call,
        clippy::cast_precision_loss
    )
)]

//! Index Engine - Free-Float Index Computation and Distribution
//!
//! Computes a free-float market cap weighted index over a fixed constituent
//! set, keeps it continuous across constituent changes with a chain-linked
//! divisor, archives end-of-day values and streams snapshots to many
//! concurrent viewers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Index rules and data types, no I/O
//!   - `constituent`: Constituent metadata and the registry
//!   - `quote`: Price snapshots and the last-good-price book
//!   - `index`: Calculator, snapshots and weight tables
//!   - `divisor`: Base calibration and chain-linking
//!   - `history`: Date-keyed archive with last-write-wins merge
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote source, repository and snapshot publisher
//!   - `services`: The single-writer `IndexEngine`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Bounded per-subscriber fan-out and keepalives
//!   - `wire`: Tagged stream messages
//!   - `http`: REST, stream and administrative endpoints
//!   - `scheduler`: Market calendar, ticks and end-of-day
//!   - `persistence`, `quotes`, `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! QuoteSource ──► IndexEngine ──► BroadcastHub ──► queue ──► /ws/index ──► Viewer 1
//!  (scheduler)        │                        ├─► queue ──► /ws/index ──► Viewer 2
//!                     ▼                        └─► queue ──► /ws/index ──► Viewer N
//!               IndexRepository
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Index types and rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::constituent::{Constituent, ConstituentRegistry, RegistryChange, RegistryError};
pub use domain::divisor::{DEFAULT_BASE_VALUE, Divisor, DivisorCalibrator, DivisorError};
pub use domain::history::{HistoryPoint, HistorySource, HistoryStore, UpsertOutcome};
pub use domain::index::{ConstituentWeight, IndexCalculator, IndexLevel, IndexSnapshot};
pub use domain::quote::QuoteSnapshot;

// Ports and engine
pub use application::ports::{
    IndexRepository, QuoteError, QuoteSource, RepositoryError, SnapshotPublisher,
};
pub use application::services::{
    BackfillReport, EngineError, EngineSettings, EngineStatus, IndexEngine, RecalibrationReport,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, EngineConfig, IndexSettings, ScheduleSettings, ServerSettings,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub, BroadcastStats};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};

// Stream wire format
pub use infrastructure::wire::{KEEPALIVE_PING, StreamMessage, WireError, decode_message};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
