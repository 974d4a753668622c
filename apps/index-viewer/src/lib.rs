#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening
    )
)]

//! Index Viewer - Reconciling Stream Client
//!
//! Keeps a local view of the index that survives disconnects: a REST
//! fallback fills it until the engine's stream delivers `initial`, after
//! which stream messages replace the current value and merge history by
//! date.
//!
//! - `reconciler`: Merge rules and the degraded view
//! - `connection`: Fixed-delay reconnect state machine
//! - `client`: Stream loop with keepalive pings
//! - `rest`: REST fallback
//! - `config`: Environment configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod connection;
pub mod reconciler;
pub mod rest;

pub use client::{ClientError, StreamClient};
pub use config::{ViewerConfig, ViewerConfigError};
pub use connection::{ConnectionState, NextStep, ReconnectConfig, ReconnectMachine};
pub use reconciler::{Applied, ClientReconciler, DataSource, RestSnapshot, ViewState};
pub use rest::{RestClient, RestError};
