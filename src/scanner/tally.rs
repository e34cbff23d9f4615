use crate::config::CensusConfig;
use crate::core::{CellKey, GoodTotals, ItemStack, StorageUnit};
use std::collections::{BTreeSet, HashSet};

/// What counts toward a cell's raw tally.
#[derive(Debug, Clone, Default)]
pub struct CountingRules {
    pub include_nested: bool,
    /// Empty means every kind.
    pub included_kinds: BTreeSet<String>,
}

impl CountingRules {
    pub fn from_config(config: &CensusConfig) -> Self {
        Self {
            include_nested: config.include_nested_storage,
            included_kinds: config.included_kinds.clone(),
        }
    }

    fn counts_kind(&self, kind: &str) -> bool {
        self.included_kinds.is_empty() || self.included_kinds.contains(kind)
    }
}

/// Raw, unclamped contents of one cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellTally {
    pub totals: GoodTotals,
    pub unit_count: usize,
}

/// Sums the storage units of `cell`.
///
/// Empty units are skipped. Both halves of a multi-part unit report the same
/// contents, so the unit is counted once under its identity. When the halves
/// straddle a cell border it belongs to the identity cell, unless that cell is
/// not in `loaded`; then the cell holding the other half counts it.
pub fn tally_cell(
    cell: &CellKey,
    units: &[StorageUnit],
    loaded: &HashSet<CellKey>,
    rules: &CountingRules,
) -> CellTally {
    let mut tally = CellTally::default();
    let mut seen = HashSet::new();

    for unit in units {
        if !rules.counts_kind(&unit.kind) || unit.is_empty() {
            continue;
        }

        if unit.is_multi_part() {
            let identity = unit.identity();
            let owner = identity.cell();
            if owner != *cell && loaded.contains(&owner) {
                continue;
            }
            if !seen.insert(identity.clone()) {
                continue;
            }
        }

        tally.unit_count += 1;
        for stack in &unit.contents {
            add_stack(&mut tally.totals, stack, rules.include_nested);
        }
    }

    tally
}

fn add_stack(totals: &mut GoodTotals, stack: &ItemStack, include_nested: bool) {
    if stack.quantity > 0 {
        let slot = totals.entry(stack.good).or_insert(0);
        *slot = slot.saturating_add(stack.quantity);
    }

    if include_nested {
        // one level only: contents of boxes inside boxes are ignored
        for inner in &stack.nested {
            add_stack(totals, inner, false);
        }
    }
}
