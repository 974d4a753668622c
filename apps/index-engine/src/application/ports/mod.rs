//! Port Interfaces
//!
//! Contracts between the index engine and the outside world, following the
//! hexagonal layout. Infrastructure adapters implement these traits; the
//! engine service only ever talks to them through `Arc<dyn _>`.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: Per-ticker price snapshots and daily closes
//! - `IndexRepository`: Durable engine state and history
//! - `SnapshotPublisher`: Fan-out of snapshots to live subscribers

mod publisher;
mod quote_source;
mod repository;

pub use publisher::SnapshotPublisher;
pub use quote_source::{QuoteError, QuoteSource};
pub use repository::{EngineStateRecord, IndexRepository, PersistedIndex, RepositoryError};

#[cfg(test)]
pub use quote_source::MockQuoteSource;
