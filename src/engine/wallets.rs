//! Wallet pool preparation.
//!
//! Builds the per-job wallet snapshot once at start: deduplicates the
//! token's wallets, reads their balances in one batch, and assigns each
//! side a selection weight. The snapshot is owned by the job loop and
//! updated in place from swap results; it is never persisted.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::SellWeight;
use crate::types::{EngineError, Side, SwapResult, WalletCapability, WalletRecord};
use crate::venue::{BalanceSource, PoolKey};

/// `ceil(orders / wallets * 1.5)` in integer arithmetic; zero for a side
/// without wallets.
pub fn selection_weight(orders: u64, wallets: usize) -> u64 {
    if wallets == 0 {
        return 0;
    }
    let num = u128::from(orders) * 3;
    let den = wallets as u128 * 2;
    u64::try_from(num.div_ceil(den)).unwrap_or(u64::MAX)
}

#[derive(Debug)]
pub struct WalletState {
    pub record: Arc<WalletRecord>,
    pub native_balance: u128,
    pub token_balance: u128,
    pub capability: WalletCapability,
    pub buy_weight: u64,
    pub sell_weight: u64,
}

impl WalletState {
    /// Weight used when picking this wallet for `side`.
    pub fn weight(&self, side: Side, sell_policy: SellWeight) -> u64 {
        match (side, sell_policy) {
            (Side::Buy, _) | (Side::Sell, SellWeight::Buy) => self.buy_weight,
            (Side::Sell, SellWeight::Sell) => self.sell_weight,
        }
    }

    /// Move balances by the amounts the pool reported.
    pub fn apply(&mut self, swap: &SwapResult) {
        if swap.is_buy {
            self.native_balance = self.native_balance.saturating_sub(swap.native_amount);
            self.token_balance = self.token_balance.saturating_add(swap.token_amount);
        } else {
            self.native_balance = self.native_balance.saturating_add(swap.native_amount);
            self.token_balance = self.token_balance.saturating_sub(swap.token_amount);
        }
    }
}

#[derive(Debug)]
pub struct WalletPool {
    wallets: Vec<WalletState>,
    buy_wallets: usize,
    sell_wallets: usize,
}

impl WalletPool {
    /// Snapshot the wallets a job will trade with.
    ///
    /// Fails when no wallet can trade either side, or when a side that has
    /// orders to fill has no wallet allowed to trade it.
    pub async fn prepare(
        balances: &dyn BalanceSource,
        pool: &PoolKey,
        records: Vec<Arc<WalletRecord>>,
        buy_orders: u64,
        sell_orders: u64,
    ) -> Result<Self, EngineError> {
        if records.is_empty() {
            return Err(EngineError::NoWallets(pool.token.clone()));
        }

        // Dedupe by address; a wallet listed twice keeps every capability.
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, (Arc<WalletRecord>, WalletCapability)> = HashMap::new();
        for record in records {
            let cap = record.capability;
            match merged.get_mut(&record.address) {
                Some((_, existing)) => {
                    existing.buyable |= cap.buyable;
                    existing.sellable |= cap.sellable;
                }
                None => {
                    order.push(record.address.clone());
                    merged.insert(record.address.clone(), (record, cap));
                }
            }
        }
        order.retain(|addr| {
            merged
                .get(addr)
                .is_some_and(|(_, cap)| cap.buyable || cap.sellable)
        });

        let buy_wallets = order.iter().filter(|a| merged[*a].1.allows(Side::Buy)).count();
        let sell_wallets = order.iter().filter(|a| merged[*a].1.allows(Side::Sell)).count();
        if buy_wallets == 0 && sell_wallets == 0 {
            return Err(EngineError::NoWallets(pool.token.clone()));
        }
        if buy_orders > 0 && buy_wallets == 0 {
            return Err(EngineError::NoEligibleWallets { token: pool.token.clone(), side: Side::Buy });
        }
        if sell_orders > 0 && sell_wallets == 0 {
            return Err(EngineError::NoEligibleWallets { token: pool.token.clone(), side: Side::Sell });
        }

        let fetched = balances
            .balances(pool, &order)
            .await
            .map_err(|e| EngineError::Chain(format!("balance fetch failed: {e:#}")))?;
        if fetched.len() != order.len() {
            return Err(EngineError::Chain(format!(
                "balance source returned {} entries for {} wallets",
                fetched.len(),
                order.len()
            )));
        }

        let buy_weight = selection_weight(buy_orders, buy_wallets);
        let sell_weight = selection_weight(sell_orders, sell_wallets);
        let wallets = order
            .iter()
            .zip(fetched)
            .filter_map(|(addr, bal)| merged.remove(addr).map(|entry| (entry, bal)))
            .map(|((record, cap), bal)| WalletState {
                record,
                native_balance: bal.native,
                token_balance: bal.token,
                capability: cap,
                buy_weight,
                sell_weight,
            })
            .collect::<Vec<_>>();

        debug!(
            token = %pool.token,
            wallets = wallets.len(),
            buy_wallets,
            sell_wallets,
            buy_weight,
            sell_weight,
            "Wallet pool prepared"
        );

        Ok(Self {
            wallets,
            buy_wallets,
            sell_wallets,
        })
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn buy_wallets(&self) -> usize {
        self.buy_wallets
    }

    pub fn sell_wallets(&self) -> usize {
        self.sell_wallets
    }

    pub fn get(&self, idx: usize) -> Option<&WalletState> {
        self.wallets.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut WalletState> {
        self.wallets.get_mut(idx)
    }

    /// Buyable wallets holding strictly more native than `size`.
    pub fn eligible_buyers(&self, size: u128) -> Vec<usize> {
        self.eligible(|w| w.capability.allows(Side::Buy) && w.native_balance > size)
    }

    /// Sellable wallets holding strictly more token than `min_token`.
    pub fn eligible_sellers(&self, min_token: u128) -> Vec<usize> {
        self.eligible(|w| w.capability.allows(Side::Sell) && w.token_balance > min_token)
    }

    fn eligible(&self, keep: impl Fn(&WalletState) -> bool) -> Vec<usize> {
        self.wallets
            .iter()
            .enumerate()
            .filter(|(_, w)| keep(w))
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
