//! Paper venue.
//!
//! Simulates a constant-price pool so the whole engine can run without a
//! chain. Every swap gets a fresh synthetic transaction hash and a
//! monotonically increasing block number. All wallets report the same
//! configured starting balances.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{BalanceSource, PoolKey, SwapExecutor, WalletBalance};
use crate::config::PaperConfig;
use crate::types::{SwapResult, WalletRecord};

/// Nominal in-range liquidity reported on every simulated swap.
const PAPER_LIQUIDITY: u128 = 1_000_000_000_000_000_000_000_000;

/// Simulated pool quoting a fixed number of tokens per native unit.
pub struct PaperVenue {
    tokens_per_eth: u128,
    native_balance: u128,
    token_balance: u128,
    block: AtomicU64,
}

impl PaperVenue {
    pub fn new(tokens_per_eth: u64, native_balance: u128, token_balance: u128) -> Result<Self> {
        if tokens_per_eth == 0 {
            bail!("Paper venue needs a positive tokens_per_eth");
        }
        Ok(Self {
            tokens_per_eth: u128::from(tokens_per_eth),
            native_balance,
            token_balance,
            block: AtomicU64::new(1),
        })
    }

    pub fn from_config(cfg: &PaperConfig) -> Result<Self> {
        let native = cfg
            .native_balance
            .parse::<u128>()
            .context("paper.native_balance is not an integer")?;
        let token = cfg
            .token_balance
            .parse::<u128>()
            .context("paper.token_balance is not an integer")?;
        Self::new(cfg.tokens_per_eth, native, token)
    }

    fn next_block(&self) -> u64 {
        self.block.fetch_add(1, Ordering::Relaxed)
    }

    /// Build the parsed swap a real pool would have logged.
    ///
    /// The token is treated as `token0`, so pool-perspective deltas are
    /// negative for whatever left the pool.
    fn settle(&self, wallet: &WalletRecord, is_buy: bool, token_amount: u128, native_amount: u128) -> Result<SwapResult> {
        let token_delta = i128::try_from(token_amount).context("token amount overflow")?;
        let native_delta = i128::try_from(native_amount).context("native amount overflow")?;
        let (amount0, amount1) = if is_buy {
            (-token_delta, native_delta)
        } else {
            (token_delta, -native_delta)
        };

        // price of token0 in token1 = 1 / tokens_per_eth
        let price = 1.0 / self.tokens_per_eth as f64;
        let sqrt_price_x96 = (price.sqrt() * 2f64.powi(96)) as u128;
        let tick = (price.ln() / 1.0001f64.ln()).floor() as i32;

        let hash = format!(
            "0x{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );

        Ok(SwapResult {
            token_amount,
            native_amount,
            is_buy,
            sender: "paper-router".to_string(),
            recipient: wallet.address.clone(),
            amount0,
            amount1,
            sqrt_price_x96: sqrt_price_x96.to_string(),
            liquidity: PAPER_LIQUIDITY,
            tick,
            transaction_hash: hash,
            log_index: 0,
            block_number: self.next_block(),
        })
    }

    fn tokens_for(&self, native: u128) -> Result<u128> {
        native
            .checked_mul(self.tokens_per_eth)
            .context("paper quote overflow")
    }
}

#[async_trait]
impl SwapExecutor for PaperVenue {
    async fn buy(&self, wallet: &WalletRecord, pool: &PoolKey, native_in: u128) -> Result<SwapResult> {
        if native_in == 0 {
            bail!("Cannot buy with zero input");
        }
        let tokens = self.tokens_for(native_in)?;
        debug!(wallet = %wallet.address, token = %pool.token, native_in, tokens, "[PAPER] buy");
        self.settle(wallet, true, tokens, native_in)
    }

    async fn sell_exact_native(
        &self,
        wallet: &WalletRecord,
        pool: &PoolKey,
        native_out: u128,
    ) -> Result<SwapResult> {
        if native_out == 0 {
            bail!("Cannot sell for zero output");
        }
        let tokens = self.tokens_for(native_out)?;
        debug!(wallet = %wallet.address, token = %pool.token, native_out, tokens, "[PAPER] sell exact native");
        self.settle(wallet, false, tokens, native_out)
    }

    async fn sell_exact_token(
        &self,
        wallet: &WalletRecord,
        pool: &PoolKey,
        token_in: u128,
    ) -> Result<SwapResult> {
        let native = token_in / self.tokens_per_eth;
        if native == 0 {
            bail!("Token input {token_in} is below one wei of output");
        }
        debug!(wallet = %wallet.address, token = %pool.token, token_in, native, "[PAPER] sell exact token");
        self.settle(wallet, false, token_in, native)
    }

    async fn quote_required_token(&self, _pool: &PoolKey, native_out: u128) -> Result<u128> {
        self.tokens_for(native_out)
    }
}

#[async_trait]
impl BalanceSource for PaperVenue {
    async fn balances(&self, _pool: &PoolKey, addresses: &[String]) -> Result<Vec<WalletBalance>> {
        Ok(addresses
            .iter()
            .map(|_| WalletBalance {
                native: self.native_balance,
                token: self.token_balance,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
