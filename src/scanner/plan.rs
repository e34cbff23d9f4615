use crate::cache::{CellCache, CellCacheEntry};
use crate::config::CensusConfig;
use crate::core::CellKey;
use crate::tracker::DirtyCellTracker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanMode {
    /// Every loaded cell is rescanned; the cache is only written.
    Full,
    /// Only dirty or expired cells are rescanned.
    Incremental,
}

/// Full when caching is off, when forced, or on every
/// `full_rescan_every_cycles`-th cycle counting from zero.
pub fn choose_mode(config: &CensusConfig, cycle: u64, force_full: bool) -> ScanMode {
    if !config.cache_enabled || force_full || cycle % config.full_rescan_every_cycles.max(1) == 0 {
        ScanMode::Full
    } else {
        ScanMode::Incremental
    }
}

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub mode: ScanMode,
    pub to_scan: Vec<CellKey>,
    pub from_cache: Vec<(CellKey, Arc<CellCacheEntry>)>,
    /// Dirty marks consumed by this plan, restored for cells left unscanned.
    pub drained_dirty: HashSet<CellKey>,
}

/// Splits the loaded cells into cells to rescan and cells served from cache.
///
/// In incremental mode, neighbours of cells that loaded or unloaded since the
/// last cycle are rescanned too: a multi-part unit across that border may have
/// changed which cell counts it. Cells are ordered by key so consecutive
/// cycles batch identically.
pub fn plan_scan(
    loaded: &HashSet<CellKey>,
    mode: ScanMode,
    tracker: &DirtyCellTracker,
    cache: &CellCache,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> ScanPlan {
    let drained_dirty = tracker.drain_eligible(loaded);
    let border_changed = if mode == ScanMode::Incremental {
        border_neighbours(loaded, cache)
    } else {
        HashSet::new()
    };

    let mut cells: Vec<&CellKey> = loaded.iter().collect();
    cells.sort();

    let mut to_scan = Vec::new();
    let mut from_cache = Vec::new();

    for cell in cells {
        if mode == ScanMode::Full || drained_dirty.contains(cell) || border_changed.contains(cell) {
            to_scan.push(cell.clone());
            continue;
        }

        match cache.get(cell) {
            Some(entry) if entry.is_fresh(now, ttl) => from_cache.push((cell.clone(), entry)),
            _ => to_scan.push(cell.clone()),
        }
    }

    ScanPlan {
        mode,
        to_scan,
        from_cache,
        drained_dirty,
    }
}

/// Loaded cells next to a cell that is new (loaded, never cached) or gone
/// (cached, no longer loaded).
fn border_neighbours(loaded: &HashSet<CellKey>, cache: &CellCache) -> HashSet<CellKey> {
    let appeared = loaded.iter().filter(|cell| cache.get(cell).is_none()).cloned();
    let departed = cache.cells().into_iter().filter(|cell| !loaded.contains(cell));

    appeared
        .chain(departed)
        .flat_map(|cell| cell.neighbours())
        .filter(|neighbour| loaded.contains(neighbour))
        .collect()
}
