//! Order sizing.
//!
//! Splits a side's remaining volume across its remaining orders, with a
//! random jitter so consecutive orders do not look alike, and strips the
//! low digits so amounts read like something a person typed.

use rand::Rng;
use std::ops::RangeInclusive;

use crate::config::EngineConfig;
use crate::types::Budget;

/// Keep the `digits` most significant decimal digits of `value`, zeroing
/// the rest.
pub fn truncate_digits(value: u128, digits: u32) -> u128 {
    if value == 0 || digits == 0 {
        return 0;
    }
    let len = value.ilog10() + 1;
    if len <= digits {
        return value;
    }
    let factor = 10u128.pow(len - digits);
    value / factor * factor
}

#[derive(Debug, Clone)]
pub struct OrderSizer {
    jitter_pct: RangeInclusive<u32>,
    buy_digits: RangeInclusive<u32>,
    sell_token_digits: RangeInclusive<u32>,
}

impl OrderSizer {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            jitter_pct: cfg.jitter_min_pct..=cfg.jitter_max_pct,
            buy_digits: cfg.buy_digits_min..=cfg.buy_digits_max,
            sell_token_digits: cfg.sell_token_digits_min..=cfg.sell_token_digits_max,
        }
    }

    /// Native amount to spend on the next buy.
    pub fn buy_size<R: Rng + ?Sized>(&self, rng: &mut R, budget: &Budget) -> u128 {
        if budget.remaining_orders > 1 {
            let jittered = self.jittered(rng, budget);
            truncate_digits(jittered, rng.gen_range(self.buy_digits.clone()))
        } else {
            self.jittered(rng, budget)
        }
    }

    /// Native amount to receive on the next sell. Not truncated.
    pub fn sell_size<R: Rng + ?Sized>(&self, rng: &mut R, budget: &Budget) -> u128 {
        self.jittered(rng, budget)
    }

    /// Token input for an exact-token-in sell, derived from a quote.
    pub fn sell_token_amount<R: Rng + ?Sized>(&self, rng: &mut R, quote: u128) -> u128 {
        truncate_digits(quote, rng.gen_range(self.sell_token_digits.clone()))
    }

    /// Even share of the remaining volume, jittered when more than one
    /// order remains. The last order takes everything that is left.
    fn jittered<R: Rng + ?Sized>(&self, rng: &mut R, budget: &Budget) -> u128 {
        match budget.remaining_orders {
            0 => 0,
            1 => budget.remaining_volume,
            orders => {
                let base = budget.remaining_volume / u128::from(orders);
                let pct = u128::from(rng.gen_range(self.jitter_pct.clone()));
                let size = match base.checked_mul(pct) {
                    Some(v) => v / 100,
                    None => (base / 100).saturating_mul(pct),
                };
                size.min(budget.remaining_volume)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
