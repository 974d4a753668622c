//! Health Check and Metrics Endpoints
//!
//! Health checks, readiness and Prometheus metrics, served on the HTTP port.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (calibrated and not halted)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::application::services::EngineStatus;
use crate::infrastructure::http::AppState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connected stream subscribers.
    pub subscribers: usize,
    /// Whether a snapshot has been computed.
    pub index_ready: bool,
    /// Halt reason, if halted.
    pub halted: Option<String>,
    /// Divisor in force.
    pub divisor: Option<f64>,
    /// Latest archived date.
    pub last_calculated: Option<NaiveDate>,
    /// Next scheduled end-of-day finalization.
    pub next_calculation: DateTime<Utc>,
    /// Tickers priced from a stale quote in the latest snapshot.
    pub stale_tickers: Vec<String>,
    /// Tickers excluded from the latest snapshot.
    pub excluded_tickers: Vec<String>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Serving, but without a snapshot or with incomplete prices.
    Degraded,
    /// Engine halted.
    Unhealthy,
}

// =============================================================================
// Routes
// =============================================================================

/// Health and metrics routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if is_ready(&state.engine.status()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let status = state.engine.status();
    let snapshot = state.engine.current_snapshot();
    let (stale_tickers, excluded_tickers) = snapshot.as_ref().map_or_else(
        || (Vec::new(), Vec::new()),
        |s| {
            (
                s.level().stale_tickers.clone(),
                s.level().excluded_tickers.clone(),
            )
        },
    );
    let now = Utc::now();

    HealthResponse {
        status: determine_health_status(
            status.halted.is_some(),
            snapshot.is_some(),
            stale_tickers.len() + excluded_tickers.len(),
        ),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        subscribers: state.hub.subscriber_count(),
        index_ready: snapshot.is_some(),
        halted: status.halted,
        divisor: status.divisor.map(|d| d.value()),
        last_calculated: status.last_history_date,
        next_calculation: state.calendar.next_calculation(now),
        stale_tickers,
        excluded_tickers,
    }
}

const fn is_ready(status: &EngineStatus) -> bool {
    status.halted.is_none() && status.divisor.is_some()
}

const fn determine_health_status(halted: bool, index_ready: bool, impaired: usize) -> HealthStatus {
    if halted {
        HealthStatus::Unhealthy
    } else if !index_ready || impaired > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Tests
// =============================================================================
