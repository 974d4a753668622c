//! Administrative handlers.
//!
//! Guarded by `Authorization: Bearer <token>` when `INDEX_ADMIN_TOKEN` is
//! set; open otherwise.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::{NaiveDate, Utc};
use serde::Serialize;

use super::{ApiError, AppState};
use crate::application::services::EngineError;
use crate::domain::constituent::RegistryChange;
use crate::domain::index::IndexLevel;
use crate::infrastructure::metrics::{self, Outcome};

#[derive(Debug, Serialize)]
pub(super) struct RecalibrationResponse {
    action: &'static str,
    ticker: String,
    old_divisor: f64,
    new_divisor: f64,
    total_ff_before: f64,
    total_ff_after: f64,
    constituent_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IndexLevel>,
}

#[derive(Debug, Serialize)]
pub(super) struct BackfillResponse {
    inserted: usize,
    first: Option<NaiveDate>,
    last: Option<NaiveDate>,
    history_count: usize,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(token) = &state.admin_token else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(candidate) if token.matches(candidate) => Ok(()),
        _ => {
            tracing::warn!("Rejected administrative request without a valid token");
            Err(ApiError::Unauthorized)
        }
    }
}

pub(super) async fn change_constituents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<RegistryChange>, JsonRejection>,
) -> Result<Json<RecalibrationResponse>, ApiError> {
    authorize(&state, &headers)?;
    let Json(change) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let action = change.kind();
    let ticker = change.ticker().to_string();

    let result = state.engine.apply_registry_change(change, Utc::now()).await;
    metrics::set_halted(state.engine.is_halted());

    match result {
        Ok(report) => {
            metrics::record_recalibration(action, Outcome::Success);
            if let Some(snapshot) = &report.snapshot {
                let level = snapshot.level();
                metrics::set_index_gauges(
                    level.value,
                    level.divisor,
                    level.stale_tickers.len(),
                    level.excluded_tickers.len(),
                );
            }
            Ok(Json(RecalibrationResponse {
                action,
                ticker,
                old_divisor: report.old_divisor,
                new_divisor: report.new_divisor,
                total_ff_before: report.total_ff_before,
                total_ff_after: report.total_ff_after,
                constituent_count: report.constituent_count,
                index: report.snapshot.map(|s| s.level().clone()),
            }))
        }
        Err(e) => {
            let outcome = match &e {
                EngineError::Halted { .. } | EngineError::Divisor(_) => Outcome::Halted,
                _ => Outcome::Failure,
            };
            metrics::record_recalibration(action, outcome);
            Err(e.into())
        }
    }
}

pub(super) async fn backfill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BackfillResponse>, ApiError> {
    authorize(&state, &headers)?;
    let today = state.calendar.trading_date(Utc::now());
    let report = state.engine.backfill(today).await?;
    Ok(Json(BackfillResponse {
        inserted: report.inserted,
        first: report.first,
        last: report.last,
        history_count: state.engine.history_full().len(),
    }))
}
