//! HTTP Server
//!
//! One axum router on the HTTP port serves the REST API, the index stream,
//! the administrative API, health probes and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /api/index` - Current index level
//! - `GET /api/constituents` - Live weight table
//! - `GET /api/history?days=N` - History for the last `N` calendar days
//! - `GET /api/history/range?from=..&to=..` - History within a date range
//! - `GET /api/history/full` - Full history since the base date
//! - `GET /api/meta` - Index metadata
//! - `GET /ws/index` - Index stream (WebSocket)
//! - `POST /api/admin/constituents` - Constituent change with recalibration
//! - `POST /api/admin/backfill` - Historical backfill
//! - `GET /api/health`, `/healthz`, `/readyz`, `/metrics` - see [`health`]
//!
//! [`health`]: crate::infrastructure::health

mod admin;
mod api;
mod error;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;

use crate::application::services::IndexEngine;
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::config::{AdminToken, IndexSettings};
use crate::infrastructure::health;
use crate::infrastructure::scheduler::MarketCalendar;

// =============================================================================
// Shared State
// =============================================================================

/// State shared by all handlers.
pub struct AppState {
    /// Index engine.
    pub engine: Arc<IndexEngine>,
    /// Stream fan-out.
    pub hub: Arc<BroadcastHub>,
    /// Index metadata.
    pub index: IndexSettings,
    /// Exchange calendar.
    pub calendar: MarketCalendar,
    /// Bearer token for the administrative API, if required.
    pub admin_token: Option<AdminToken>,
    /// Crate version.
    pub version: String,
    /// Process start time.
    pub started_at: Instant,
    /// Process shutdown signal; stream connections close when it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub fn new(
        engine: Arc<IndexEngine>,
        hub: Arc<BroadcastHub>,
        index: IndexSettings,
        calendar: MarketCalendar,
        admin_token: Option<AdminToken>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            hub,
            index,
            calendar,
            admin_token,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            shutdown,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/index", get(api::index))
        .route("/api/constituents", get(api::constituents))
        .route("/api/history", get(api::history))
        .route("/api/history/range", get(api::history_range))
        .route("/api/history/full", get(api::history_full))
        .route("/api/meta", get(api::meta))
        .route("/ws/index", get(ws::upgrade))
        .route("/api/admin/constituents", post(admin::change_constituents))
        .route("/api/admin/backfill", post(admin::backfill))
        .merge(health::routes())
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for the index.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");
        serve(listener, self.state, self.cancel).await
    }
}

/// Serve the router on an already bound listener until cancelled.
///
/// # Errors
///
/// Returns `HttpServerError::ServerFailed` on a fatal server error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<(), HttpServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
