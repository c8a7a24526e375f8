//! In-memory collaborators for integration testing.
//!
//! `MemoryBackend` plays both the configuration source and the swap store
//! so whole jobs run without SQLite. `FlakyVenue` wraps the paper venue
//! and fails a configurable number of buys before letting them through.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mmbot::config::EngineConfig;
use mmbot::engine::{Engine, StartParams};
use mmbot::storage::{ConfigSource, SwapQuery, SwapStore};
use mmbot::types::*;
use mmbot::venue::paper::PaperVenue;
use mmbot::venue::{BalanceSource, PoolKey, SwapExecutor, WalletBalance};

pub const TOKEN: &str = "0xtoken";

/// Tokens, wallets and swaps held in memory.
#[derive(Default)]
pub struct MemoryBackend {
    tokens: Mutex<HashMap<String, TokenConfig>>,
    wallets: Mutex<HashMap<String, Vec<Arc<WalletRecord>>>>,
    swaps: Mutex<Vec<SwapRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `TOKEN` with the given wallets.
    pub fn with_token(wallets: &[(&str, bool, bool)]) -> Self {
        let backend = Self::new();
        backend.tokens.lock().unwrap().insert(
            TOKEN.to_string(),
            TokenConfig {
                address: TOKEN.to_string(),
                chain_id: "2741".to_string(),
                fee: 10_000,
                enabled: true,
                invested_eth: Decimal::ZERO,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        let records = wallets
            .iter()
            .map(|(addr, buyable, sellable)| {
                let cap = WalletCapability { buyable: *buyable, sellable: *sellable };
                Arc::new(WalletRecord::new(addr, format!("key-{addr}"), cap))
            })
            .collect();
        backend.wallets.lock().unwrap().insert(TOKEN.to_string(), records);
        backend
    }

    pub fn swaps(&self) -> Vec<SwapRecord> {
        self.swaps.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwapStore for MemoryBackend {
    async fn upsert_swap(&self, record: &SwapRecord) -> Result<SwapRecord> {
        let mut swaps = self.swaps.lock().unwrap();
        if let Some(existing) = swaps
            .iter_mut()
            .find(|s| s.tx_hash == record.tx_hash && s.log_index == record.log_index)
        {
            existing.job_id = record.job_id.clone();
            return Ok(existing.clone());
        }
        swaps.push(record.clone());
        Ok(record.clone())
    }

    async fn list_swaps(&self, token: &str, query: &SwapQuery) -> Result<Vec<SwapRecord>> {
        Ok(self
            .swaps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.token_address == token)
            .filter(|s| query.is_buy.map_or(true, |b| s.is_buy == b))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConfigSource for MemoryBackend {
    async fn token(&self, address: &str) -> Result<Option<TokenConfig>> {
        Ok(self.tokens.lock().unwrap().get(address).cloned())
    }

    async fn token_wallets(&self, token: &str) -> Result<Vec<Arc<WalletRecord>>> {
        Ok(self.wallets.lock().unwrap().get(token).cloned().unwrap_or_default())
    }
}

/// Paper venue whose first `fail_buys` buys revert.
pub struct FlakyVenue {
    inner: PaperVenue,
    fail_buys: AtomicUsize,
    buy_calls: AtomicUsize,
}

impl FlakyVenue {
    pub fn new(fail_buys: usize) -> Self {
        Self {
            inner: paper(),
            fail_buys: AtomicUsize::new(fail_buys),
            buy_calls: AtomicUsize::new(0),
        }
    }

    pub fn buy_calls(&self) -> usize {
        self.buy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwapExecutor for FlakyVenue {
    async fn buy(&self, wallet: &WalletRecord, pool: &PoolKey, native_in: u128) -> Result<SwapResult> {
        self.buy_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_buys
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("execution reverted"));
        }
        self.inner.buy(wallet, pool, native_in).await
    }

    async fn sell_exact_native(&self, wallet: &WalletRecord, pool: &PoolKey, native_out: u128) -> Result<SwapResult> {
        self.inner.sell_exact_native(wallet, pool, native_out).await
    }

    async fn sell_exact_token(&self, wallet: &WalletRecord, pool: &PoolKey, token_in: u128) -> Result<SwapResult> {
        self.inner.sell_exact_token(wallet, pool, token_in).await
    }

    async fn quote_required_token(&self, pool: &PoolKey, native_out: u128) -> Result<u128> {
        self.inner.quote_required_token(pool, native_out).await
    }
}

#[async_trait]
impl BalanceSource for FlakyVenue {
    async fn balances(&self, pool: &PoolKey, addresses: &[String]) -> Result<Vec<WalletBalance>> {
        self.inner.balances(pool, addresses).await
    }
}

/// 1000 tokens per ETH; every wallet holds 1 ETH and 1M tokens.
pub fn paper() -> PaperVenue {
    PaperVenue::new(1_000, 10u128.pow(18), 10u128.pow(24)).unwrap()
}

pub fn engine_with<V>(venue: Arc<V>, backend: Arc<MemoryBackend>) -> Engine
where
    V: SwapExecutor + BalanceSource + 'static,
{
    Engine::new(venue.clone(), venue, backend.clone(), backend, EngineConfig::default())
}

pub fn params(buy: (u128, u64), sell: (u128, u64), sell_delay: u64, minutes: u64) -> StartParams {
    StartParams {
        buy_volume: buy.0.to_string(),
        buy_order: buy.1.to_string(),
        sell_volume: sell.0.to_string(),
        sell_order: sell.1.to_string(),
        sell_delay: Some(sell_delay),
        duration: minutes,
    }
}
