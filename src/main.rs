//! MMBOT: Market-making job engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, wires the venue and the engine, and serves the
//! HTTP API until Ctrl+C. Running jobs are asked to stop and given a
//! grace period to drain before the process exits.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use mmbot::api::{self, routes::ApiState};
use mmbot::config;
use mmbot::engine::Engine;
use mmbot::storage::Database;
use mmbot::venue::paper::PaperVenue;
use mmbot::venue::rpc::JsonRpcBalances;

const BANNER: &str = r#"
 __  __ __  __ ____   ___ _____
|  \/  |  \/  | __ ) / _ \_   _|
| |\/| | |\/| |  _ \| | | || |
| |  | | |  | | |_) | |_| || |
|_|  |_|_|  |_|____/ \___/ |_|

  Programmatic market-making job engine
  v0.1.0
"#;

/// How long running jobs get to finish their current tick on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        database = %cfg.database.url,
        chains = cfg.chains.len(),
        "MMBOT starting up"
    );

    // -- Persistence -----------------------------------------------------

    let db = Database::connect(&cfg.database.url).await?;
    let shared = Arc::new(db.clone());

    // -- Venue -----------------------------------------------------------

    let paper = Arc::new(PaperVenue::from_config(&cfg.paper)?);

    let mut endpoints = HashMap::new();
    for (chain_id, chain) in &cfg.chains {
        match chain.resolved_rpc_url() {
            Some(url) => {
                info!(chain_id = %chain_id, name = %chain.name, "RPC balance reads enabled");
                endpoints.insert(chain_id.clone(), url);
            }
            None => warn!(chain_id = %chain_id, name = %chain.name, "No RPC url, using paper balances"),
        }
    }
    let balances = Arc::new(JsonRpcBalances::new(endpoints)?.with_fallback(paper.clone()));

    // -- Engine & API ----------------------------------------------------

    let engine = Engine::new(paper, balances, shared.clone(), shared, cfg.engine.clone());
    let state = Arc::new(ApiState { engine, db });

    // Event streams close only when their job ends, so jobs must be
    // stopped before the server waits on open connections.
    let signal_state = state.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
        signal_state.engine.shutdown();
    };

    api::serve(state.clone(), cfg.server.port, shutdown).await?;

    if state.engine.drain(DRAIN_TIMEOUT).await {
        info!("MMBOT shut down cleanly.");
    } else {
        warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Jobs still running at exit");
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mmbot=info"));

    let json_logging = std::env::var("MMBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
