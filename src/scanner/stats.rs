use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept across scan cycles.
#[derive(Debug, Default)]
pub struct CensusStats {
    cycles_completed: AtomicU64,
    cycles_aborted: AtomicU64,
    cycles_skipped_for_load: AtomicU64,
    cycles_failed: AtomicU64,
    batches_failed: AtomicU64,
    host_timeouts: AtomicU64,
    persist_failures: AtomicU64,
    last_cells_scanned: AtomicU64,
    last_cells_cached: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CensusStatsSnapshot {
    pub cycles_completed: u64,
    pub cycles_aborted: u64,
    pub cycles_skipped_for_load: u64,
    pub cycles_failed: u64,
    pub batches_failed: u64,
    pub host_timeouts: u64,
    pub persist_failures: u64,
    pub last_cells_scanned: u64,
    pub last_cells_cached: u64,
}

impl CensusStats {
    pub fn snapshot(&self) -> CensusStatsSnapshot {
        CensusStatsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_aborted: self.cycles_aborted.load(Ordering::Relaxed),
            cycles_skipped_for_load: self.cycles_skipped_for_load.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            host_timeouts: self.host_timeouts.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            last_cells_scanned: self.last_cells_scanned.load(Ordering::Relaxed),
            last_cells_cached: self.last_cells_cached.load(Ordering::Relaxed),
        }
    }

    /// Counts a published cycle; `aborted` cycles published partial totals.
    pub(crate) fn record_published(&self, aborted: bool, cells_scanned: usize, cells_cached: usize) {
        if aborted {
            self.cycles_aborted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_cells_scanned
            .store(cells_scanned as u64, Ordering::Relaxed);
        self.last_cells_cached
            .store(cells_cached as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_for_load(&self) {
        self.cycles_skipped_for_load.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_cycle(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_batch(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_host_timeout(&self) {
        self.host_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Published cycles, full or partial.
    pub fn cycles_published(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed) + self.cycles_aborted.load(Ordering::Relaxed)
    }
}
