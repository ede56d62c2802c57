//! Caller-facing HTTP intake.
//!
//! A thin JSON surface over the engine: submit an intent, poll a record,
//! read its audit trail. The engine does not push notifications; callers
//! poll for state transitions. Authentication, sessions and dashboards live
//! in the surrounding application, not here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::{BracketEngine, EngineError, ValidationError};
use crate::models::{BracketState, OrderIntent, OrderSide};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The engine.
    pub engine: BracketEngine,
}

/// Build the intake router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/brackets", post(submit_bracket))
        .route("/v1/brackets/{key}", get(get_bracket))
        .route("/v1/brackets/{key}/transitions", get(get_transitions))
        .with_state(state)
}

/// Bracket submission request body.
#[derive(Debug, Deserialize)]
pub struct SubmitBracketRequest {
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested size.
    pub size: Decimal,
    /// Entry limit price; omit for a market entry.
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    /// Stop-loss trigger price.
    pub stop_loss_price: Decimal,
    /// Take-profit trigger price.
    pub take_profit_price: Decimal,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
}

impl From<SubmitBracketRequest> for OrderIntent {
    fn from(request: SubmitBracketRequest) -> Self {
        Self {
            symbol: request.symbol,
            side: request.side,
            size: request.size,
            entry_price: request.entry_price,
            stop_loss_price: request.stop_loss_price,
            take_profit_price: request.take_profit_price,
            idempotency_key: request.idempotency_key,
        }
    }
}

/// Bracket submission response body.
#[derive(Debug, Serialize)]
pub struct SubmitBracketResponse {
    /// The idempotency key.
    pub idempotency_key: String,
    /// Current record state.
    pub state: BracketState,
    /// Whether this request created the record.
    pub created: bool,
}

/// JSON error body with a stable code.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

fn error_response(error: &EngineError) -> Response {
    let (status, code) = match error {
        EngineError::Validation(ValidationError::DuplicateKey(_)) => {
            (StatusCode::CONFLICT, "DUPLICATE_KEY")
        }
        EngineError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED"),
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
    };

    (
        status,
        Json(ErrorBody {
            code,
            message: error.to_string(),
        }),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_bracket(
    State(state): State<AppState>,
    Json(request): Json<SubmitBracketRequest>,
) -> Response {
    match state.engine.submit(request.into()).await {
        Ok(ack) => (
            StatusCode::ACCEPTED,
            Json(SubmitBracketResponse {
                idempotency_key: ack.idempotency_key,
                state: ack.state,
                created: ack.created,
            }),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn get_bracket(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.engine.record(&key).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                code: "NOT_FOUND",
                message: format!("no bracket record for key {key}"),
            }),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn get_transitions(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.engine.transitions(&key).await {
        Ok(transitions) => Json(transitions).into_response(),
        Err(error) => error_response(&error),
    }
}
