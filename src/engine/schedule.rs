//! Tick scheduling.
//!
//! Each side keeps its own `next_at` instant. After a trade the remaining
//! window is split evenly across the remaining orders and the next trade
//! is placed one jittered share ahead. The final order waits half the
//! remaining window so it still lands before the deadline. Loop timing runs on `tokio::time::Instant`; wall-clock
//! times are derived only for snapshots and log lines.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct TickScheduler {
    jitter_pct: RangeInclusive<u32>,
}

impl TickScheduler {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            jitter_pct: cfg.jitter_min_pct..=cfg.jitter_max_pct,
        }
    }

    /// Wait before the next trade on a side, rounded up to whole seconds.
    /// `None` when nothing is left to schedule.
    pub fn next_wait<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        remaining: Duration,
        remaining_orders: u64,
    ) -> Option<Duration> {
        if remaining_orders == 0 || remaining.is_zero() {
            return None;
        }
        let remaining_secs = remaining.as_secs_f64();
        let (slot, pct) = if remaining_orders > 1 {
            (
                remaining_secs / remaining_orders as f64,
                f64::from(rng.gen_range(self.jitter_pct.clone())),
            )
        } else {
            (remaining_secs / 2.0, 100.0)
        };
        let secs = (slot * pct / 100.0).ceil();
        Some(Duration::from_secs(secs as u64))
    }
}

/// Eligibility timer for one side.
#[derive(Debug, Clone, Copy)]
pub struct SideClock {
    pub next_at: Instant,
}

impl SideClock {
    pub fn new(next_at: Instant) -> Self {
        Self { next_at }
    }

    pub fn is_due(&self, now: Instant, remaining_orders: u64) -> bool {
        remaining_orders > 0 && now >= self.next_at
    }
}

/// Maps loop instants onto wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct JobClock {
    started: Instant,
    started_wall: DateTime<Utc>,
}

impl JobClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: Utc::now(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn wall(&self, at: Instant) -> DateTime<Utc> {
        let offset = at.saturating_duration_since(self.started);
        chrono::Duration::from_std(offset)
            .ok()
            .and_then(|d| self.started_wall.checked_add_signed(d))
            .unwrap_or(self.started_wall)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
