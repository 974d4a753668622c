//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers and schedulers that
//! drive the engine.

/// Subscriber fan-out with bounded per-subscriber queues.
pub mod broadcast;

/// Configuration from the environment and the constituents file.
pub mod config;

/// Health check and metrics endpoints.
pub mod health;

/// REST, stream and administrative HTTP server.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Index document persistence (in-memory and JSON file).
pub mod persistence;

/// Simulated quote source.
pub mod quotes;

/// Market calendar and the periodic engine driver.
pub mod scheduler;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Stream wire format.
pub mod wire;
