//! Venue integrations.
//!
//! Defines the `SwapExecutor` and `BalanceSource` traits the engine trades
//! through, and provides implementations for:
//! - Paper: in-process simulated pool (constant price, synthetic hashes)
//! - JSON-RPC: native and ERC-20 balance reads against an EVM node

pub mod paper;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{SwapResult, WalletRecord};

/// Identifies the pool a job trades against: the token paired with the
/// chain's wrapped native asset at a given fee tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKey {
    pub token: String,
    pub chain_id: String,
    pub fee: u32,
}

/// Native and token balance of one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletBalance {
    pub native: u128,
    pub token: u128,
}

/// Abstraction over swap execution against a DEX pool.
///
/// Each call either lands a swap and returns the parsed `Swap` log, or
/// fails. Implementors enforce their own slippage and timeouts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    /// Spend exactly `native_in` to buy the token.
    async fn buy(&self, wallet: &WalletRecord, pool: &PoolKey, native_in: u128) -> Result<SwapResult>;

    /// Sell whatever token amount is needed to receive exactly `native_out`.
    async fn sell_exact_native(
        &self,
        wallet: &WalletRecord,
        pool: &PoolKey,
        native_out: u128,
    ) -> Result<SwapResult>;

    /// Sell exactly `token_in` of the token.
    async fn sell_exact_token(
        &self,
        wallet: &WalletRecord,
        pool: &PoolKey,
        token_in: u128,
    ) -> Result<SwapResult>;

    /// Token input currently required to receive `native_out`.
    async fn quote_required_token(&self, pool: &PoolKey, native_out: u128) -> Result<u128>;
}

/// Read-only balance lookups for a batch of wallets.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balances for `addresses`, in the same order.
    async fn balances(&self, pool: &PoolKey, addresses: &[String]) -> Result<Vec<WalletBalance>>;
}
