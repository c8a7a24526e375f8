//! HTTP route handlers.
//!
//! JSON endpoints for token and wallet configuration plus the job control
//! surface. Job start and reconnect answer with a server-sent event stream
//! that closes after the job's terminal event.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};

use crate::engine::{Engine, StartParams};
use crate::storage::{Database, NewToken, NewTokenWallets, SwapQuery, SwapStore};
use crate::types::{EngineError, JobEvent, JobStatus, SwapRecord, TokenConfig, TokenWalletView};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub engine: Engine,
    pub db: Database,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `EngineError` rendered as `{"error": ...}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::TokenNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyRunning(_)
            | EngineError::NotRunning(_)
            | EngineError::NoWallets(_)
            | EngineError::NoEligibleWallets { .. }
            | EngineError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            EngineError::Chain(_) | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestedEthRequest {
    pub invested_eth: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub stopped: bool,
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub token: String,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Event streams
// ---------------------------------------------------------------------------

fn event_name(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Log { .. } => "log",
        JobEvent::Swap { .. } => "swap",
        JobEvent::State { .. } => "state",
        JobEvent::Completed { .. } => "completed",
        JobEvent::Failed { .. } => "failed",
    }
}

/// Turn a job subscription into SSE frames, ending after the terminal event.
fn job_stream(rx: Receiver<JobEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    let frame = Event::default()
                        .event(event_name(&event))
                        .json_data(&event)
                        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
                    return Some((Ok(frame), (rx, terminal)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, dropping oldest events");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Token configuration
// ---------------------------------------------------------------------------

/// GET /api/tokens
pub async fn list_tokens(State(state): State<AppState>) -> ApiResult<Json<Vec<TokenConfig>>> {
    Ok(Json(state.db.list_tokens().await?))
}

/// POST /api/tokens
pub async fn create_token(
    State(state): State<AppState>,
    Json(req): Json<NewToken>,
) -> ApiResult<(StatusCode, Json<TokenConfig>)> {
    let token = state.db.create_token(&req).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// GET /api/tokens/:address
pub async fn get_token(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<TokenConfig>> {
    Ok(Json(state.db.get_token(&address).await?))
}

/// PATCH /api/tokens/:address/invested-eth
pub async fn update_invested_eth(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(req): Json<InvestedEthRequest>,
) -> ApiResult<Json<TokenConfig>> {
    Ok(Json(state.db.update_invested_eth(&address, req.invested_eth).await?))
}

/// PATCH /api/tokens/:address/toggle-enabled
pub async fn toggle_enabled(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<TokenConfig>> {
    Ok(Json(state.db.toggle_token_enabled(&address).await?))
}

/// POST /api/token-wallets
pub async fn create_token_wallets(
    State(state): State<AppState>,
    Json(req): Json<NewTokenWallets>,
) -> ApiResult<(StatusCode, Json<Vec<TokenWalletView>>)> {
    let created = state.db.create_token_wallets(&req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/tokens/:address/wallets
pub async fn list_token_wallets(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<Vec<TokenWalletView>>> {
    Ok(Json(state.db.list_token_wallets(&address).await?))
}

// ---------------------------------------------------------------------------
// Job control
// ---------------------------------------------------------------------------

/// GET /api/bot/:token/start
pub async fn start_job(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<StartParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let sub = state.engine.start(&token, &params).await?;
    info!(token = %token, job_id = %sub.job_id, "Job stream opened");
    Ok(Sse::new(job_stream(sub.events)).keep_alive(KeepAlive::default()))
}

/// GET /api/bot/:token/reconnect
pub async fn reconnect_job(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let sub = state.engine.reconnect(&token)?;
    info!(token = %token, job_id = %sub.job_id, "Job stream reattached");
    Ok(Sse::new(job_stream(sub.events)).keep_alive(KeepAlive::default()))
}

/// POST /api/bot/:token/stop
pub async fn stop_job(State(state): State<AppState>, Path(token): Path<String>) -> Json<StopResponse> {
    let stopped = state.engine.stop(&token);
    Json(StopResponse {
        stopped: stopped.is_some(),
        job_id: stopped.map(|id| id.to_string()),
    })
}

/// GET /api/bot/:token/status
pub async fn job_status(State(state): State<AppState>, Path(token): Path<String>) -> Json<StatusResponse> {
    let status = state.engine.status(&token);
    Json(StatusResponse { token, status })
}

/// GET /api/bot/:token/swaps
pub async fn list_swaps(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<SwapQuery>,
) -> ApiResult<Json<Vec<SwapRecord>>> {
    let swaps = state
        .db
        .list_swaps(&token, &query)
        .await
        .map_err(|e| EngineError::Storage(format!("{e:#}")))?;
    Ok(Json(swaps))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
