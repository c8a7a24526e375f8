//! HTTP API: Axum server for configuration and job control.
//!
//! Serves the token/wallet configuration endpoints and the job control
//! surface (start, reconnect, stop, swap history). CORS is open so a
//! browser console on another origin can drive the bot.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, patch, post},
    Router,
};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use routes::AppState;

/// Bind `port` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;

    info!(port, "API server listening on http://localhost:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Token configuration
        .route("/api/tokens", get(routes::list_tokens).post(routes::create_token))
        .route("/api/tokens/:address", get(routes::get_token))
        .route("/api/tokens/:address/invested-eth", patch(routes::update_invested_eth))
        .route("/api/tokens/:address/toggle-enabled", patch(routes::toggle_enabled))
        .route("/api/tokens/:address/wallets", get(routes::list_token_wallets))
        .route("/api/token-wallets", post(routes::create_token_wallets))
        // Job control
        .route("/api/bot/:token/start", get(routes::start_job))
        .route("/api/bot/:token/reconnect", get(routes::reconnect_job))
        .route("/api/bot/:token/stop", post(routes::stop_job))
        .route("/api/bot/:token/status", get(routes::job_status))
        .route("/api/bot/:token/swaps", get(routes::list_swaps))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
