//! Domain Layer - Index computation types and rules.
//!
//! Everything in this layer is synchronous and free of I/O. The engine
//! service composes these pieces; adapters only ever see the resulting
//! snapshots and history points.

/// Constituent metadata and administrative changes.
pub mod constituent;

/// Divisor calibration and chain-linking.
pub mod divisor;

/// Date-keyed history archive.
pub mod history;

/// Index calculator and snapshot types.
pub mod index;

/// Quote snapshots and the last-good-price book.
pub mod quote;
