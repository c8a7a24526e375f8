//! Weighted wallet selection.

use rand::Rng;

pub struct WeightedSelector;

impl WeightedSelector {
    /// Pick an index into `weights` with probability proportional to its
    /// weight. Falls back to a uniform pick when every weight is zero.
    /// Returns `None` only for an empty slice.
    pub fn pick<R: Rng + ?Sized>(rng: &mut R, weights: &[u64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let total: u128 = weights.iter().map(|&w| u128::from(w)).sum();
        if total == 0 {
            return Some(rng.gen_range(0..weights.len()));
        }

        // Draw from 1..=total so zero-weight entries can never win.
        let draw = rng.gen_range(1..=total);
        let mut cumulative = 0u128;
        for (i, &w) in weights.iter().enumerate() {
            cumulative += u128::from(w);
            if cumulative >= draw {
                return Some(i);
            }
        }
        Some(rng.gen_range(0..weights.len()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
