//! Shared types for the MMBOT engine.
//!
//! These types form the data model used across all modules: token and
//! wallet configuration, swap results as reported by the venue, the
//! persisted swap record, per-side budgets, and the events streamed to
//! job observers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimals used by the native asset and by every token the bot trades.
pub const TOKEN_DECIMALS: u32 = 18;

/// Lower-case and trim an address so registry keys and database lookups
/// agree regardless of checksum casing.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Convert a smallest-unit amount into whole units (e.g. wei → ETH).
///
/// Amounts too large for a `Decimal` saturate at `Decimal::MAX`; they are
/// only ever used for display.
pub fn to_units(amount: u128) -> Decimal {
    i128::try_from(amount)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, TOKEN_DECIMALS).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Trading direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration records
// ---------------------------------------------------------------------------

/// A token the bot is configured to trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub chain_id: String,
    /// Pool fee tier in hundredths of a basis point (e.g. 10000 = 1%).
    pub fee: u32,
    pub enabled: bool,
    /// Capital the operator has put behind this token, in whole ETH.
    pub invested_eth: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which sides a wallet may trade for a given token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletCapability {
    pub buyable: bool,
    pub sellable: bool,
}

impl WalletCapability {
    pub fn allows(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.buyable,
            Side::Sell => self.sellable,
        }
    }
}

/// A wallet assigned to a token, including its signing key.
///
/// The key is never serialized; only the swap executor ever exposes it.
#[derive(Debug)]
pub struct WalletRecord {
    pub address: String,
    pub capability: WalletCapability,
    pub private_key: SecretString,
}

impl WalletRecord {
    pub fn new(address: &str, private_key: String, capability: WalletCapability) -> Self {
        Self {
            address: normalize_address(address),
            capability,
            private_key: SecretString::new(private_key),
        }
    }
}

/// Public view of a token/wallet assignment (no key material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenWalletView {
    pub wallet_address: String,
    pub token_address: String,
    pub buyable: bool,
    pub sellable: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Swaps
// ---------------------------------------------------------------------------

/// A swap as parsed from the pool's `Swap` log by the venue.
///
/// `token_amount` and `native_amount` are absolute values: for a buy the
/// native amount went into the pool and the token amount came out, for a
/// sell the reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapResult {
    pub token_amount: u128,
    pub native_amount: u128,
    pub is_buy: bool,
    pub sender: String,
    pub recipient: String,
    pub amount0: i128,
    pub amount1: i128,
    pub sqrt_price_x96: String,
    pub liquidity: u128,
    pub tick: i32,
    pub transaction_hash: String,
    pub log_index: u32,
    pub block_number: u64,
}

/// A persisted swap row, uniquely keyed by `(tx_hash, log_index)`.
///
/// Large integers are carried as decimal strings so they survive JSON
/// consumers that parse numbers as doubles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub tx_hash: String,
    pub log_index: u32,
    pub job_id: Option<String>,
    pub is_buy: bool,
    pub token_address: String,
    pub chain_id: String,
    pub block_number: u64,
    pub token_amount: String,
    pub eth_amount: String,
    pub sender: String,
    pub recipient: String,
    pub amount0: String,
    pub amount1: String,
    pub sqrt_price_x96: String,
    pub liquidity: String,
    pub tick: i32,
}

impl SwapRecord {
    pub fn from_swap(swap: &SwapResult, token: &str, chain_id: &str, job_id: Option<&JobId>) -> Self {
        Self {
            tx_hash: swap.transaction_hash.clone(),
            log_index: swap.log_index,
            job_id: job_id.map(|id| id.to_string()),
            is_buy: swap.is_buy,
            token_address: normalize_address(token),
            chain_id: chain_id.to_string(),
            block_number: swap.block_number,
            token_amount: swap.token_amount.to_string(),
            eth_amount: swap.native_amount.to_string(),
            sender: swap.sender.clone(),
            recipient: swap.recipient.clone(),
            amount0: swap.amount0.to_string(),
            amount1: swap.amount1.to_string(),
            sqrt_price_x96: swap.sqrt_price_x96.clone(),
            liquidity: swap.liquidity.to_string(),
            tick: swap.tick,
        }
    }
}

impl fmt::Display for SwapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}#{}] {} token={} eth={} tick={}",
            self.tx_hash,
            self.log_index,
            if self.is_buy { "BUY" } else { "SELL" },
            self.token_amount,
            self.eth_amount,
            self.tick,
        )
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Remaining volume and order count for one side of a job.
///
/// Both fields only ever move downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Budget {
    /// Smallest-unit native amount still to trade.
    pub remaining_volume: u128,
    pub remaining_orders: u64,
}

impl Budget {
    pub fn new(volume: u128, orders: u64) -> Self {
        Self {
            remaining_volume: volume,
            remaining_orders: orders,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_orders == 0
    }

    /// Consume one order and `volume` of the remaining volume.
    pub fn record_fill(&mut self, volume: u128) {
        self.remaining_orders = self.remaining_orders.saturating_sub(1);
        self.remaining_volume = self.remaining_volume.saturating_sub(volume);
    }
}

// ---------------------------------------------------------------------------
// Jobs & events
// ---------------------------------------------------------------------------

/// Opaque identifier of one trading job run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// A fresh, short, random job id.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(raw[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a token's job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a job's remaining budgets and side timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub remain_buy_order: u64,
    pub remain_sell_order: u64,
    /// Remaining buy volume in whole ETH.
    pub remain_buy_volume: Decimal,
    /// Remaining sell volume in whole ETH.
    pub remain_sell_volume: Decimal,
    pub next_buy_at: DateTime<Utc>,
    pub next_sell_at: DateTime<Utc>,
}

/// Why a job's execution loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every order on both sides was executed.
    BudgetExhausted,
    /// The job's wall-clock deadline passed.
    Deadline,
    /// Stopped by the operator or superseded by a newer job.
    Superseded,
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::BudgetExhausted => write!(f, "budget exhausted"),
            FinishReason::Deadline => write!(f, "deadline reached"),
            FinishReason::Superseded => write!(f, "stopped by another job"),
            FinishReason::Shutdown => write!(f, "stopped by shutdown"),
        }
    }
}

/// Event streamed to every observer of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Log {
        job_id: JobId,
        message: String,
    },
    Swap {
        job_id: JobId,
        swap: SwapRecord,
        state: JobSnapshot,
    },
    State {
        job_id: JobId,
        state: JobSnapshot,
    },
    /// Terminal: the loop ended normally.
    Completed {
        job_id: JobId,
        reason: FinishReason,
    },
    /// Terminal: the loop task died unexpectedly.
    Failed {
        job_id: JobId,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Log { job_id, .. }
            | JobEvent::Swap { job_id, .. }
            | JobEvent::State { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Lifecycle and configuration errors surfaced synchronously to callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Bot is already running for token {0}")]
    AlreadyRunning(String),

    #[error("Bot is not running for token {0}")]
    NotRunning(String),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("No wallets found for token {0}")]
    NoWallets(String),

    #[error("No {side} wallets available for token {token}")]
    NoEligibleWallets { token: String, side: Side },

    #[error("Invalid start parameters: {0}")]
    InvalidParams(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
