//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the engine service and the port interfaces that
//! define how the domain interacts with quote providers, storage and
//! subscribers.

/// Port interfaces for external systems (quotes, storage, fan-out).
pub mod ports;

/// Application services driving the index pipeline.
pub mod services;
