//! Job execution loop.
//!
//! One `JobRunner` per started job. Each iteration checks whether the job
//! should end, publishes a state snapshot, then tries a buy and a sell,
//! with a fixed throttle after each side. A failed trade is logged and the
//! loop moves on; only the end conditions stop it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::broadcast::EventBroadcaster;
use super::registry::JobRegistry;
use super::schedule::{JobClock, SideClock, TickScheduler};
use super::selector::WeightedSelector;
use super::sizing::OrderSizer;
use super::wallets::WalletPool;
use crate::config::{EngineConfig, SellWeight};
use crate::storage::SwapStore;
use crate::types::{
    to_units, Budget, FinishReason, JobEvent, JobId, JobSnapshot, Side, SwapRecord, SwapResult,
};
use crate::venue::{PoolKey, SwapExecutor};

/// Budgets and timing a job starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    pub buy: Budget,
    pub sell: Budget,
    pub duration: Duration,
    pub sell_delay: Duration,
}

/// Shared collaborators a runner trades and reports through.
#[derive(Clone)]
pub struct JobServices {
    pub executor: Arc<dyn SwapExecutor>,
    pub store: Arc<dyn SwapStore>,
    pub registry: Arc<JobRegistry>,
    pub shutdown: Arc<AtomicBool>,
}

pub struct JobRunner {
    job_id: JobId,
    pool: PoolKey,
    wallets: WalletPool,
    buy: Budget,
    sell: Budget,
    clock: JobClock,
    deadline: Instant,
    buy_clock: SideClock,
    sell_clock: SideClock,
    events: Arc<EventBroadcaster>,
    services: JobServices,
    sizer: OrderSizer,
    scheduler: TickScheduler,
    throttle: Duration,
    sell_margin_pct: u32,
    sell_policy: SellWeight,
    rng: StdRng,
}

impl JobRunner {
    /// Build a runner whose clock starts now.
    pub fn new(
        job_id: JobId,
        pool: PoolKey,
        wallets: WalletPool,
        plan: JobPlan,
        events: Arc<EventBroadcaster>,
        services: JobServices,
        cfg: &EngineConfig,
    ) -> Self {
        let clock = JobClock::start();
        let started = clock.started();
        Self {
            job_id,
            pool,
            wallets,
            buy: plan.buy,
            sell: plan.sell,
            clock,
            deadline: started + plan.duration,
            buy_clock: SideClock::new(started),
            sell_clock: SideClock::new(started + plan.sell_delay),
            events,
            services,
            sizer: OrderSizer::from_config(cfg),
            scheduler: TickScheduler::from_config(cfg),
            throttle: Duration::from_millis(cfg.tick_throttle_ms),
            sell_margin_pct: cfg.sell_margin_pct,
            sell_policy: cfg.sell_selection_weight,
            rng: StdRng::from_entropy(),
        }
    }

    /// Drive the job until one of its end conditions holds.
    pub async fn run(mut self) -> FinishReason {
        self.banner();

        let reason = loop {
            if let Some(reason) = self.end_condition() {
                break reason;
            }
            self.publish_state();

            let now = Instant::now();
            if self.buy_clock.is_due(now, self.buy.remaining_orders) {
                self.buy_tick().await;
            }
            tokio::time::sleep(self.throttle).await;

            if let Some(reason) = self.end_condition() {
                break reason;
            }
            let now = Instant::now();
            if self.sell_clock.is_due(now, self.sell.remaining_orders) {
                self.sell_tick().await;
            }
            tokio::time::sleep(self.throttle).await;
        };

        match reason {
            FinishReason::Shutdown => self.log(format!("[{}] Bot stopped by shutdown", self.job_id)),
            FinishReason::Superseded => self.log(format!("[{}] Bot stopped by another job", self.job_id)),
            FinishReason::BudgetExhausted | FinishReason::Deadline => {}
        }
        self.log(format!(
            "[{}] Bot stopped in {:.1} seconds",
            self.job_id,
            self.clock.elapsed().as_secs_f64()
        ));
        reason
    }

    fn end_condition(&self) -> Option<FinishReason> {
        if Instant::now() >= self.deadline {
            Some(FinishReason::Deadline)
        } else if self.buy.is_exhausted() && self.sell.is_exhausted() {
            Some(FinishReason::BudgetExhausted)
        } else if self.services.shutdown.load(Ordering::SeqCst) {
            Some(FinishReason::Shutdown)
        } else if !self.services.registry.is_current(&self.pool.token, &self.job_id) {
            Some(FinishReason::Superseded)
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Buy side
    // -----------------------------------------------------------------------

    async fn buy_tick(&mut self) {
        let orders = self.buy.remaining_orders;
        let tag = format!("[{}][Buy-{orders}]", self.job_id);

        let size = self.sizer.buy_size(&mut self.rng, &self.buy);
        if size == 0 {
            self.buy.record_fill(0);
            self.log(format!("{tag} Order sized to zero, retired"));
            self.reschedule(Side::Buy);
            return;
        }

        let candidates = self.wallets.eligible_buyers(size);
        let Some(idx) = self.pick(Side::Buy, &candidates) else {
            self.log(format!("{tag} No valid wallets to buy with {} eth", to_units(size)));
            return;
        };
        let Some(wallet) = self.wallets.get(idx).map(|w| w.record.clone()) else {
            return;
        };

        self.log(format!("{tag}[{}] Buy with {} eth", wallet.address, to_units(size)));
        match self.services.executor.buy(&wallet, &self.pool, size).await {
            Ok(swap) => {
                self.log(format!(
                    "{tag}[{}] Buy success with {} eth",
                    wallet.address,
                    to_units(swap.native_amount)
                ));
                if let Some(state) = self.wallets.get_mut(idx) {
                    state.apply(&swap);
                }
                self.buy.record_fill(size);
                self.reschedule(Side::Buy);
                self.settle(&swap).await;
            }
            Err(e) => self.warn(format!("{tag} Buy error: {e:#}")),
        }
    }

    // -----------------------------------------------------------------------
    // Sell side
    // -----------------------------------------------------------------------

    async fn sell_tick(&mut self) {
        let orders = self.sell.remaining_orders;
        let tag = format!("[{}][Sell-{orders}]", self.job_id);

        let native_out = self.sizer.sell_size(&mut self.rng, &self.sell);
        if native_out == 0 {
            self.sell.record_fill(0);
            self.log(format!("{tag} Order sized to zero, retired"));
            self.reschedule(Side::Sell);
            return;
        }

        let quote = match self
            .services
            .executor
            .quote_required_token(&self.pool, native_out)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                self.warn(format!("{tag} Sell quote error: {e:#}"));
                return;
            }
        };

        let min_token = quote
            .saturating_mul(u128::from(100 + self.sell_margin_pct))
            / 100;
        let candidates = self.wallets.eligible_sellers(min_token);
        let Some(idx) = self.pick(Side::Sell, &candidates) else {
            self.log(format!(
                "{tag} No valid wallets to sell {} token for {} eth",
                to_units(quote),
                to_units(native_out)
            ));
            return;
        };
        let Some(wallet) = self.wallets.get(idx).map(|w| w.record.clone()) else {
            return;
        };

        let result = if self.rng.gen_bool(0.5) {
            self.log(format!("{tag}[{}] Sell to take {} eth", wallet.address, to_units(native_out)));
            self.services
                .executor
                .sell_exact_native(&wallet, &self.pool, native_out)
                .await
        } else {
            let token_in = self.sizer.sell_token_amount(&mut self.rng, quote);
            self.log(format!("{tag}[{}] Sell with {} token", wallet.address, to_units(token_in)));
            self.services
                .executor
                .sell_exact_token(&wallet, &self.pool, token_in)
                .await
        };

        match result {
            Ok(swap) => {
                self.log(format!(
                    "{tag}[{}] Sell success {} token to {} eth",
                    wallet.address,
                    to_units(swap.token_amount),
                    to_units(swap.native_amount)
                ));
                if let Some(state) = self.wallets.get_mut(idx) {
                    state.apply(&swap);
                }
                self.sell.record_fill(swap.native_amount);
                self.reschedule(Side::Sell);
                self.settle(&swap).await;
            }
            Err(e) => self.warn(format!("{tag} Sell error: {e:#}")),
        }
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    fn pick(&mut self, side: Side, candidates: &[usize]) -> Option<usize> {
        let weights: Vec<u64> = candidates
            .iter()
            .map(|&i| self.wallets.get(i).map_or(0, |w| w.weight(side, self.sell_policy)))
            .collect();
        WeightedSelector::pick(&mut self.rng, &weights).map(|k| candidates[k])
    }

    /// Place the side's next trade after a successful one.
    fn reschedule(&mut self, side: Side) {
        let now = Instant::now();
        let orders = match side {
            Side::Buy => self.buy.remaining_orders,
            Side::Sell => self.sell.remaining_orders,
        };
        if now >= self.deadline || orders == 0 {
            return;
        }
        let Some(wait) = self.scheduler.next_wait(&mut self.rng, self.deadline - now, orders) else {
            return;
        };
        let next = now + wait;
        let label = match side {
            Side::Buy => {
                self.buy_clock.next_at = next;
                "buy"
            }
            Side::Sell => {
                self.sell_clock.next_at = next;
                "sell"
            }
        };
        self.log(format!(
            "[{}][{side}-{orders}] prepare next {label} after {} seconds at {}",
            self.job_id,
            wait.as_secs(),
            self.clock.wall(next).to_rfc3339()
        ));
    }

    /// Persist a landed swap and tell subscribers about it.
    async fn settle(&self, swap: &SwapResult) {
        let record = SwapRecord::from_swap(swap, &self.pool.token, &self.pool.chain_id, Some(&self.job_id));
        let stored = match self.services.store.upsert_swap(&record).await {
            Ok(stored) => stored,
            Err(e) => {
                self.warn(format!("[{}] Failed to store swap {record}: {e:#}", self.job_id));
                record
            }
        };
        self.events.publish(JobEvent::Swap {
            job_id: self.job_id.clone(),
            swap: stored,
            state: self.snapshot(),
        });
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            remain_buy_order: self.buy.remaining_orders,
            remain_sell_order: self.sell.remaining_orders,
            remain_buy_volume: to_units(self.buy.remaining_volume),
            remain_sell_volume: to_units(self.sell.remaining_volume),
            next_buy_at: self.clock.wall(self.buy_clock.next_at),
            next_sell_at: self.clock.wall(self.sell_clock.next_at),
        }
    }

    fn publish_state(&self) {
        self.events.publish(JobEvent::State {
            job_id: self.job_id.clone(),
            state: self.snapshot(),
        });
    }

    fn banner(&self) {
        self.log(format!(
            "[{}] start job:\ntoken: {}\nbuyWallets: {}\nsellWallets: {}\nsellVolume: {}\nsellOrder: {}\nbuyVolume: {}\nbuyOrder: {}",
            self.job_id,
            self.pool.token,
            self.wallets.buy_wallets(),
            self.wallets.sell_wallets(),
            to_units(self.sell.remaining_volume),
            self.sell.remaining_orders,
            to_units(self.buy.remaining_volume),
            self.buy.remaining_orders,
        ));
    }

    fn log(&self, message: String) {
        info!(job_id = %self.job_id, token = %self.pool.token, "{message}");
        self.events.publish(JobEvent::Log {
            job_id: self.job_id.clone(),
            message,
        });
    }

    fn warn(&self, message: String) {
        warn!(job_id = %self.job_id, token = %self.pool.token, "{message}");
        self.events.publish(JobEvent::Log {
            job_id: self.job_id.clone(),
            message,
        });
    }
}
