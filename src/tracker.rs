//! Cells changed since they were last scanned.

use crate::core::CellKey;
use dashmap::DashSet;
use std::collections::HashSet;

/// Concurrent set of dirty cells.
///
/// Event hooks add from any context; only the scan orchestrator removes. A
/// cell marked while being drained may be rescanned one extra time, which is
/// harmless, and a lost mark is covered by cache expiry.
#[derive(Debug, Default)]
pub struct DirtyCellTracker {
    cells: DashSet<CellKey>,
}

impl DirtyCellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, cell: CellKey) {
        self.cells.insert(cell);
    }

    pub fn is_dirty(&self, cell: &CellKey) -> bool {
        self.cells.contains(cell)
    }

    /// Removes and returns the dirty cells that are currently loaded. Marks for
    /// unloaded cells stay until those cells load again.
    pub fn drain_eligible(&self, loaded: &HashSet<CellKey>) -> HashSet<CellKey> {
        let candidates: Vec<CellKey> = if self.cells.len() < loaded.len() {
            self.cells
                .iter()
                .filter(|cell| loaded.contains(cell.key()))
                .map(|cell| cell.key().clone())
                .collect()
        } else {
            loaded
                .iter()
                .filter(|cell| self.cells.contains(*cell))
                .cloned()
                .collect()
        };

        candidates
            .into_iter()
            .filter_map(|cell| self.cells.remove(&cell))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
