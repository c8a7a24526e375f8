//! End-to-end job lifecycle tests.
//!
//! Most scenarios run on paused tokio time so minute-long jobs finish
//! instantly; the SQLite scenario runs on real time with a short throttle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use mmbot::config::EngineConfig;
use mmbot::engine::Engine;
use mmbot::storage::{Database, NewToken, NewTokenWallets, NewWallet, SwapQuery, SwapStore};
use mmbot::types::*;

use crate::mock_venue::{engine_with, paper, params, FlakyVenue, MemoryBackend, TOKEN};

const FUNDED: &[(&str, bool, bool)] = &[("0xw1", true, true)];
const ETH: u128 = 1_000_000_000_000_000_000;

async fn collect(mut rx: Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    loop {
        match rx.recv().await {
            Ok(ev) => seen.push(ev),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    seen
}

fn snapshots(events: &[JobEvent]) -> Vec<JobSnapshot> {
    events
        .iter()
        .filter_map(|ev| match ev {
            JobEvent::State { state, .. } | JobEvent::Swap { state, .. } => Some(state.clone()),
            _ => None,
        })
        .collect()
}

fn finish_reason(events: &[JobEvent]) -> Option<FinishReason> {
    match events.last() {
        Some(JobEvent::Completed { reason, .. }) => Some(*reason),
        _ => None,
    }
}

fn logged(events: &[JobEvent], needle: &str) -> usize {
    events
        .iter()
        .filter(|ev| matches!(ev, JobEvent::Log { message, .. } if message.contains(needle)))
        .count()
}

// ---------------------------------------------------------------------------
// Buy-only job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_two_buys_exhaust_budget_before_deadline() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let engine = engine_with(Arc::new(paper()), backend.clone());

    let started = tokio::time::Instant::now();
    let sub = engine.start(TOKEN, &params((1000, 2), (0, 0), 0, 1)).await.unwrap();
    let events = collect(sub.events).await;

    assert_eq!(finish_reason(&events), Some(FinishReason::BudgetExhausted));
    assert!(started.elapsed() < Duration::from_secs(60));

    let swaps = backend.swaps();
    assert_eq!(swaps.len(), 2);
    assert!(swaps.iter().all(|s| s.is_buy && s.job_id.as_deref() == Some(sub.job_id.as_str())));
    assert_ne!(swaps[0].tx_hash, swaps[1].tx_hash);

    // the last order takes whatever volume is left
    let spent: u128 = swaps.iter().map(|s| s.eth_amount.parse::<u128>().unwrap()).sum();
    assert_eq!(spent, 1000);

    assert!(logged(&events, "prepare next buy after 30 seconds") >= 1);
    assert!(logged(&events, "Bot stopped in") == 1);
    assert!(engine.drain(Duration::from_secs(1)).await);
    assert_eq!(engine.status(TOKEN), JobStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_buy_is_retried_without_consuming_budget() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let venue = Arc::new(FlakyVenue::new(2));
    let engine = engine_with(venue.clone(), backend.clone());

    let sub = engine.start(TOKEN, &params((ETH / 1000, 1), (0, 0), 0, 5)).await.unwrap();
    let events = collect(sub.events).await;

    assert_eq!(finish_reason(&events), Some(FinishReason::BudgetExhausted));
    assert_eq!(logged(&events, "Buy error"), 2);
    assert_eq!(venue.buy_calls(), 3);
    assert_eq!(backend.swaps().len(), 1);
}

// ---------------------------------------------------------------------------
// Start validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_rejects_missing_wallets() {
    let backend = Arc::new(MemoryBackend::with_token(&[]));
    let engine = engine_with(Arc::new(paper()), backend);
    let err = engine.start(TOKEN, &params((1000, 1), (0, 0), 0, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoWallets(_)));
    assert_eq!(engine.status(TOKEN), JobStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_side_without_wallets() {
    let backend = Arc::new(MemoryBackend::with_token(&[("0xbuyer", true, false)]));
    let engine = engine_with(Arc::new(paper()), backend.clone());

    let err = engine.start(TOKEN, &params((1000, 1), (1000, 1), 0, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoEligibleWallets { side: Side::Sell, .. }));
    assert_eq!(engine.status(TOKEN), JobStatus::Idle);
    assert!(matches!(engine.reconnect(TOKEN), Err(EngineError::NotRunning(_))));
    assert!(backend.swaps().is_empty());

    // the slot is free again for a valid request
    let sub = engine.start(TOKEN, &params((1000, 1), (0, 0), 0, 1)).await.unwrap();
    assert_eq!(finish_reason(&collect(sub.events).await), Some(FinishReason::BudgetExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_while_running() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let engine = engine_with(Arc::new(paper()), backend);

    let first = engine.start(TOKEN, &params((ETH / 100, 10), (0, 0), 0, 60)).await.unwrap();
    let err = engine.start("0xTOKEN", &params((1000, 1), (0, 0), 0, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));
    assert_eq!(engine.status(TOKEN), JobStatus::Running);

    assert_eq!(engine.stop(TOKEN), Some(first.job_id));
    collect(first.events).await;
}

// ---------------------------------------------------------------------------
// Stop, restart, reconnect
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_stop_clears_slot_and_allows_restart() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let engine = engine_with(Arc::new(paper()), backend);

    let first = engine.start(TOKEN, &params((ETH / 100, 10), (0, 0), 0, 60)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.stop(TOKEN), Some(first.job_id.clone()));
    assert_eq!(engine.stop(TOKEN), None);

    let events = collect(first.events).await;
    assert_eq!(finish_reason(&events), Some(FinishReason::Superseded));
    assert_eq!(logged(&events, "Bot stopped by another job"), 1);
    assert!(engine.drain(Duration::from_secs(1)).await);
    assert_eq!(engine.status(TOKEN), JobStatus::Idle);

    let second = engine.start(TOKEN, &params((1000, 1), (0, 0), 0, 1)).await.unwrap();
    assert_ne!(second.job_id, first.job_id);
    assert_eq!(finish_reason(&collect(second.events).await), Some(FinishReason::BudgetExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_follows_running_job() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let engine = engine_with(Arc::new(paper()), backend.clone());

    let sub = engine.start(TOKEN, &params((ETH / 100, 3), (0, 0), 0, 3)).await.unwrap();
    let again = engine.reconnect("0xToken").unwrap();
    assert_eq!(again.job_id, sub.job_id);

    let (original, reattached) = tokio::join!(collect(sub.events), collect(again.events));
    assert_eq!(finish_reason(&original), finish_reason(&reattached));
    assert!(reattached.iter().all(|ev| ev.job_id() == &sub.job_id));

    let swaps_seen = reattached.iter().filter(|ev| matches!(ev, JobEvent::Swap { .. })).count();
    assert_eq!(swaps_seen, backend.swaps().len());
    assert!(matches!(engine.reconnect(TOKEN), Err(EngineError::NotRunning(_))));
}

// ---------------------------------------------------------------------------
// Budgets
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_budgets_only_move_down() {
    let backend = Arc::new(MemoryBackend::with_token(&[("0xw1", true, true), ("0xw2", false, true)]));
    let engine = engine_with(Arc::new(paper()), backend.clone());

    let sub = engine
        .start(TOKEN, &params((ETH / 100, 4), (ETH / 100, 4), 0, 10))
        .await
        .unwrap();
    let events = collect(sub.events).await;
    assert!(finish_reason(&events).is_some());

    let states = snapshots(&events);
    assert!(!states.is_empty());
    for pair in states.windows(2) {
        assert!(pair[1].remain_buy_order <= pair[0].remain_buy_order);
        assert!(pair[1].remain_sell_order <= pair[0].remain_sell_order);
        assert!(pair[1].remain_buy_volume <= pair[0].remain_buy_volume);
        assert!(pair[1].remain_sell_volume <= pair[0].remain_sell_volume);
    }

    let last = states.last().unwrap();
    let swaps = backend.swaps();
    let buys = swaps.iter().filter(|s| s.is_buy).count() as u64;
    let sells = swaps.iter().filter(|s| !s.is_buy).count() as u64;
    assert_eq!(buys, 4 - last.remain_buy_order);
    assert_eq!(sells, 4 - last.remain_sell_order);
    // sell-only wallet never buys
    assert!(swaps.iter().filter(|s| s.is_buy).all(|s| s.recipient == "0xw1"));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_every_job() {
    let backend = Arc::new(MemoryBackend::with_token(FUNDED));
    let engine = engine_with(Arc::new(paper()), backend);

    let sub = engine.start(TOKEN, &params((ETH / 100, 10), (0, 0), 0, 60)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    engine.shutdown();
    assert!(engine.drain(Duration::from_secs(10)).await);

    let events = collect(sub.events).await;
    assert_eq!(finish_reason(&events), Some(FinishReason::Shutdown));
    assert_eq!(logged(&events, "Bot stopped by shutdown"), 1);
}

// ---------------------------------------------------------------------------
// SQLite-backed run
// ---------------------------------------------------------------------------

async fn seeded_db() -> Database {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.create_token(&NewToken { address: "0xTOKEN".into(), chain_id: "2741".into(), fee: 10_000 })
        .await
        .unwrap();
    db.create_token_wallets(&NewTokenWallets {
        token_address: TOKEN.into(),
        wallets: vec![NewWallet {
            address: "0xW1".into(),
            private_key: "k1".into(),
            buyable: true,
            sellable: true,
        }],
    })
    .await
    .unwrap();
    db
}

#[tokio::test]
async fn test_job_persists_swaps_idempotently() {
    let db = Arc::new(seeded_db().await);
    let venue = Arc::new(paper());
    let settings = EngineConfig { tick_throttle_ms: 10, ..EngineConfig::default() };
    let engine = Engine::new(venue.clone(), venue, db.clone(), db.clone(), settings);

    let sub = engine.start(TOKEN, &params((ETH / 1000, 1), (0, 0), 0, 1)).await.unwrap();
    let events = collect(sub.events).await;
    assert_eq!(finish_reason(&events), Some(FinishReason::BudgetExhausted));

    let swaps = db.list_swaps(TOKEN, &SwapQuery::default()).await.unwrap();
    assert_eq!(swaps.len(), 1);
    assert_eq!(swaps[0].job_id.as_deref(), Some(sub.job_id.as_str()));

    // the same swap seen again by a later job only moves the tag
    let mut replay = swaps[0].clone();
    replay.job_id = Some("replayed".into());
    let stored = db.upsert_swap(&replay).await.unwrap();
    assert_eq!(stored.job_id.as_deref(), Some("replayed"));
    assert_eq!(stored.eth_amount, swaps[0].eth_amount);
    assert_eq!(db.list_swaps(TOKEN, &SwapQuery::default()).await.unwrap().len(), 1);
}
