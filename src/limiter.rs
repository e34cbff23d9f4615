//! Anti-manipulation clamp applied to each cell's raw tally.

use crate::config::CensusConfig;
use crate::core::GoodTotals;

/// Bounds what one cell can add to the aggregate.
///
/// Each good is first capped at `per_good_cap`. If the capped goods still sum
/// past `per_cell_cap`, every good is scaled by `per_cell_cap / capped_sum`
/// and floored, which keeps the proportions between goods. Goods that floor to
/// zero are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContributionLimiter {
    per_cell_cap: u64,
    per_good_cap: u64,
}

impl ContributionLimiter {
    pub fn new(per_cell_cap: u64, per_good_cap: u64) -> Self {
        Self {
            per_cell_cap,
            per_good_cap,
        }
    }

    pub fn from_config(config: &CensusConfig) -> Self {
        Self::new(config.per_cell_cap, config.per_good_cap)
    }

    pub fn clamp(&self, raw: &GoodTotals) -> GoodTotals {
        let capped: Vec<_> = raw
            .iter()
            .map(|(good, quantity)| (*good, (*quantity).min(self.per_good_cap)))
            .collect();

        let capped_sum: u128 = capped.iter().map(|(_, quantity)| *quantity as u128).sum();
        let cell_cap = self.per_cell_cap as u128;

        capped
            .into_iter()
            .map(|(good, quantity)| {
                let scaled = if capped_sum > cell_cap {
                    // floor(quantity * cap / sum), exact in integers
                    (quantity as u128 * cell_cap / capped_sum) as u64
                } else {
                    quantity
                };
                (good, scaled)
            })
            .filter(|(_, quantity)| *quantity > 0)
            .collect()
    }
}
