//! Trading job engine.
//!
//! Owns the per-token job lifecycle: `start` validates the request, claims
//! the token's registry slot, snapshots the wallet pool and spawns the
//! execution loop; `stop` releases the slot so the loop ends on its next
//! check; `reconnect` attaches another observer to a running job.
//!
//! Each loop runs under a supervisor task that clears the registry slot
//! and sends the terminal event once the loop returns or dies.

pub mod broadcast;
pub mod job;
pub mod registry;
pub mod schedule;
pub mod selector;
pub mod sizing;
pub mod wallets;

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, error, info, warn};

use self::job::{JobPlan, JobRunner, JobServices};
use self::registry::JobRegistry;
use self::wallets::WalletPool;
use crate::config::EngineConfig;
use crate::storage::{ConfigSource, SwapStore};
use crate::types::{normalize_address, Budget, EngineError, JobEvent, JobId, JobStatus};
use crate::venue::{BalanceSource, PoolKey, SwapExecutor};

// ---------------------------------------------------------------------------
// Start parameters
// ---------------------------------------------------------------------------

/// Parameters of a start request. Volumes and order counts arrive as
/// decimal strings so smallest-unit amounts survive any transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub buy_volume: String,
    pub buy_order: String,
    pub sell_volume: String,
    pub sell_order: String,
    /// Minutes before the first sell.
    #[serde(default)]
    pub sell_delay: Option<u64>,
    /// Job length in minutes.
    pub duration: u64,
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, EngineError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| EngineError::InvalidParams(format!("{name} must be a non-negative integer, got {raw:?}")))
}

fn minutes(name: &str, mins: u64) -> Result<Duration, EngineError> {
    mins.checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| EngineError::InvalidParams(format!("{name} is too large")))
}

impl StartParams {
    /// Validate and convert into the budgets and timers a job runs with.
    pub fn plan(&self, default_sell_delay_mins: u64) -> Result<JobPlan, EngineError> {
        let buy = Budget::new(
            parse_field("buyVolume", &self.buy_volume)?,
            parse_field("buyOrder", &self.buy_order)?,
        );
        let sell = Budget::new(
            parse_field("sellVolume", &self.sell_volume)?,
            parse_field("sellOrder", &self.sell_order)?,
        );
        if self.duration == 0 {
            return Err(EngineError::InvalidParams("duration must be at least one minute".into()));
        }
        Ok(JobPlan {
            buy,
            sell,
            duration: minutes("duration", self.duration)?,
            sell_delay: minutes("sellDelay", self.sell_delay.unwrap_or(default_sell_delay_mins))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A registry slot claimed by `start` but not yet handed to a running loop.
/// Releases the slot on drop unless disarmed.
struct SlotClaim {
    registry: Arc<JobRegistry>,
    token: String,
    job_id: JobId,
    armed: bool,
}

impl SlotClaim {
    fn new(registry: Arc<JobRegistry>, token: &str, job_id: &JobId) -> Self {
        Self {
            registry,
            token: token.to_string(),
            job_id: job_id.clone(),
            armed: true,
        }
    }

    /// The loop owns the slot from here on.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        if self.armed && self.registry.release(&self.token, &self.job_id) {
            debug!(token = %self.token, job_id = %self.job_id, "Unstarted job slot released");
        }
    }
}

/// A live view of one job: its id and an event stream that ends with a
/// terminal event.
#[derive(Debug)]
pub struct JobSubscription {
    pub job_id: JobId,
    pub events: Receiver<JobEvent>,
}

pub struct Engine {
    registry: Arc<JobRegistry>,
    executor: Arc<dyn SwapExecutor>,
    balances: Arc<dyn BalanceSource>,
    store: Arc<dyn SwapStore>,
    config: Arc<dyn ConfigSource>,
    settings: EngineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        executor: Arc<dyn SwapExecutor>,
        balances: Arc<dyn BalanceSource>,
        store: Arc<dyn SwapStore>,
        config: Arc<dyn ConfigSource>,
        settings: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            executor,
            balances,
            store,
            config,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a job for `token` and subscribe to it.
    ///
    /// Configuration problems are reported here and never produce a loop
    /// or any event.
    pub async fn start(&self, token: &str, params: &StartParams) -> Result<JobSubscription, EngineError> {
        let token = normalize_address(token);
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidParams("engine is shutting down".into()));
        }
        let plan = params.plan(self.settings.default_sell_delay_mins)?;

        let (job_id, events) = self.registry.begin(&token, self.settings.event_buffer)?;
        // Held across the awaits below: if this future is dropped or prepare
        // fails, the slot goes back to idle.
        let claim = SlotClaim::new(self.registry.clone(), &token, &job_id);

        let (pool, wallets) = match self.prepare(&token, &plan).await {
            Ok(prepared) => prepared,
            Err(e) => {
                drop(claim);
                events.detach_all(JobEvent::Failed {
                    job_id: job_id.clone(),
                    error: e.to_string(),
                });
                warn!(token = %token, job_id = %job_id, error = %e, "Job start rejected");
                return Err(e);
            }
        };
        let receiver = events
            .attach()
            .ok_or_else(|| EngineError::NotRunning(token.clone()))?;

        info!(
            token = %token,
            job_id = %job_id,
            chain_id = %pool.chain_id,
            wallets = wallets.len(),
            buy_orders = plan.buy.remaining_orders,
            sell_orders = plan.sell.remaining_orders,
            duration_secs = plan.duration.as_secs(),
            "Starting job"
        );

        let services = JobServices {
            executor: self.executor.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
        };
        let runner = JobRunner::new(
            job_id.clone(),
            pool,
            wallets,
            plan,
            events.clone(),
            services,
            &self.settings,
        );
        let handle = tokio::spawn(runner.run());
        claim.disarm();

        let registry = self.registry.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let terminal = match handle.await {
                Ok(reason) => {
                    info!(token = %token, job_id = %id, reason = %reason, "Job finished");
                    JobEvent::Completed { job_id: id.clone(), reason }
                }
                Err(e) => {
                    error!(token = %token, job_id = %id, error = %e, "Job task died");
                    JobEvent::Failed {
                        job_id: id.clone(),
                        error: if e.is_panic() {
                            "job task panicked".to_string()
                        } else {
                            "job task was cancelled".to_string()
                        },
                    }
                }
            };
            registry.release(&token, &id);
            events.detach_all(terminal);
        });

        Ok(JobSubscription { job_id, events: receiver })
    }

    async fn prepare(&self, token: &str, plan: &JobPlan) -> Result<(PoolKey, WalletPool), EngineError> {
        let cfg = self
            .config
            .token(token)
            .await
            .map_err(|e| EngineError::Storage(format!("{e:#}")))?
            .ok_or_else(|| EngineError::TokenNotFound(token.to_string()))?;

        let records = self
            .config
            .token_wallets(token)
            .await
            .map_err(|e| EngineError::Storage(format!("{e:#}")))?;

        let pool = PoolKey {
            token: cfg.address,
            chain_id: cfg.chain_id,
            fee: cfg.fee,
        };
        let wallets = WalletPool::prepare(
            self.balances.as_ref(),
            &pool,
            records,
            plan.buy.remaining_orders,
            plan.sell.remaining_orders,
        )
        .await?;
        Ok((pool, wallets))
    }

    /// Ask the running job for `token` to stop after its current step.
    pub fn stop(&self, token: &str) -> Option<JobId> {
        self.registry.stop(&normalize_address(token))
    }

    /// Attach another observer to the running job for `token`.
    pub fn reconnect(&self, token: &str) -> Result<JobSubscription, EngineError> {
        let (job_id, events) = self.registry.subscribe(&normalize_address(token))?;
        Ok(JobSubscription { job_id, events })
    }

    pub fn status(&self, token: &str) -> JobStatus {
        self.registry.status(&normalize_address(token))
    }

    /// Make every loop exit at its next check and refuse new starts.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let running = self.registry.running();
        info!(jobs = running.len(), "Engine shutting down");
        for (token, job_id) in running {
            info!(token = %token, job_id = %job_id, "Waiting for job to stop");
        }
    }

    /// Wait until every job slot has been released, or `timeout` passes.
    /// Returns whether the engine drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.registry.slot_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
