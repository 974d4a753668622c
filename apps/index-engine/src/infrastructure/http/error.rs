//! HTTP error mapping.
//!
//! Every failure leaves the API as a JSON body `{"error": <code>, "message":
//! <text>}` with a matching status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::services::EngineError;
use crate::domain::constituent::RegistryError;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No snapshot has been computed yet.
    #[error("index not yet calculated")]
    NotReady,

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong bearer token.
    #[error("missing or invalid admin token")]
    Unauthorized,

    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Engine(e) => match e {
                EngineError::Halted { .. } => (StatusCode::SERVICE_UNAVAILABLE, "halted"),
                EngineError::NotCalibrated => (StatusCode::SERVICE_UNAVAILABLE, "not_calibrated"),
                EngineError::MissingPrice { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "missing_price")
                }
                EngineError::Registry(RegistryError::UnknownTicker(_)) => {
                    (StatusCode::NOT_FOUND, "unknown_ticker")
                }
                EngineError::Registry(RegistryError::DuplicateTicker(_)) => {
                    (StatusCode::CONFLICT, "duplicate_ticker")
                }
                EngineError::Registry(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_change"),
                EngineError::History(_) => (StatusCode::BAD_REQUEST, "invalid_range"),
                EngineError::Divisor(_) => (StatusCode::INTERNAL_SERVER_ERROR, "divisor_error"),
                EngineError::Calculation(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "calculation_error")
                }
                EngineError::Repository(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
                }
                EngineError::Quote(_) => (StatusCode::BAD_GATEWAY, "quote_error"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = error, "Request failed");
        } else {
            tracing::debug!(error = %self, code = error, "Request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
