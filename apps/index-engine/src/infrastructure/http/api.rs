//! Read-only REST handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::domain::history::HistoryPoint;
use crate::domain::index::{ConstituentWeight, IndexLevel};

/// Methodology tag reported by `/api/meta`.
pub const METHODOLOGY: &str = "Free-float Market Cap Weighted (Divisor Method)";

const DEFAULT_HISTORY_DAYS: u32 = 365;
const MAX_HISTORY_DAYS: u32 = 3650;

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub(super) struct IndexResponse {
    index: IndexLevel,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct ConstituentsResponse {
    constituents: Vec<ConstituentWeight>,
    total: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct HistoryResponse {
    history: Vec<HistoryPoint>,
    count: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct FullHistoryResponse {
    history: Vec<HistoryPoint>,
    count: usize,
    base_date: NaiveDate,
    base_value: f64,
}

#[derive(Debug, Serialize)]
pub(super) struct MetaResponse {
    name: String,
    full_name: String,
    base_date: NaiveDate,
    base_value: f64,
    divisor: Option<f64>,
    methodology: &'static str,
    currency: String,
    constituent_count: usize,
    last_calculated: Option<NaiveDate>,
    next_calculation: DateTime<Utc>,
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RangeQuery {
    from: NaiveDate,
    to: NaiveDate,
}

// =============================================================================
// Handlers
// =============================================================================

pub(super) async fn index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IndexResponse>, ApiError> {
    state.engine.ensure_running()?;
    let snapshot = state.engine.current_snapshot().ok_or(ApiError::NotReady)?;
    Ok(Json(IndexResponse {
        index: snapshot.level().clone(),
        updated_at: snapshot.level().timestamp,
    }))
}

pub(super) async fn constituents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConstituentsResponse>, ApiError> {
    state.engine.ensure_running()?;
    let snapshot = state.engine.current_snapshot().ok_or(ApiError::NotReady)?;
    let constituents = snapshot.constituents().to_vec();
    Ok(Json(ConstituentsResponse {
        total: constituents.len(),
        constituents,
    }))
}

pub(super) async fn history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=MAX_HISTORY_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )));
    }

    let today = state.calendar.trading_date(Utc::now());
    let from = today - TimeDelta::days(i64::from(days));
    let history = state.engine.history_range(from, today)?;
    Ok(Json(HistoryResponse {
        count: history.len(),
        history,
    }))
}

pub(super) async fn history_range(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(RangeQuery { from, to }) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let history = state.engine.history_range(from, to)?;
    Ok(Json(HistoryResponse {
        count: history.len(),
        history,
    }))
}

pub(super) async fn history_full(State(state): State<Arc<AppState>>) -> Json<FullHistoryResponse> {
    let history = state.engine.history_full();
    let (base_date, base_value) = base(&state);
    Json(FullHistoryResponse {
        count: history.len(),
        history,
        base_date,
        base_value,
    })
}

pub(super) async fn meta(State(state): State<Arc<AppState>>) -> Json<MetaResponse> {
    let status = state.engine.status();
    let (base_date, base_value) = base(&state);
    Json(MetaResponse {
        name: state.index.name.clone(),
        full_name: state.index.full_name.clone(),
        base_date,
        base_value,
        divisor: status.divisor.map(|d| d.value()),
        methodology: METHODOLOGY,
        currency: state.index.currency.clone(),
        constituent_count: status.constituent_count,
        last_calculated: status.last_history_date,
        next_calculation: state.calendar.next_calculation(Utc::now()),
    })
}

/// Base date and value in force: the calibrated divisor's, else configured.
fn base(state: &AppState) -> (NaiveDate, f64) {
    state.engine.status().divisor.map_or(
        (state.index.base_date, state.index.base_value),
        |d| (d.base_date(), d.base_value()),
    )
}
