//! Memoized per-cell scan results.

use crate::core::{CellKey, GoodTotals};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;

/// Clamped contribution of one cell as of its last scan. Never mutated; a
/// rescan replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CellCacheEntry {
    pub totals: GoodTotals,
    pub unit_count: usize,
    pub scanned_at: DateTime<Utc>,
}

impl CellCacheEntry {
    pub fn new(totals: GoodTotals, unit_count: usize, scanned_at: DateTime<Utc>) -> Self {
        Self {
            totals,
            unit_count,
            scanned_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.scanned_at <= ttl
    }
}

#[derive(Debug, Default)]
pub struct CellCache {
    entries: DashMap<CellKey, Arc<CellCacheEntry>>,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cell: &CellKey) -> Option<Arc<CellCacheEntry>> {
        self.entries.get(cell).map(|entry| entry.value().clone())
    }

    /// Replaces the entry for `cell`. An entry older than the one already
    /// cached is ignored so `scanned_at` never moves backwards; returns whether
    /// the entry was stored.
    pub fn put(&self, cell: CellKey, entry: CellCacheEntry) -> bool {
        match self.entries.entry(cell) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().scanned_at > entry.scanned_at {
                    return false;
                }
                occupied.insert(Arc::new(entry));
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(entry));
                true
            }
        }
    }

    /// Drops every entry whose cell is not in `loaded`, returning how many
    /// were removed.
    pub fn prune_except(&self, loaded: &HashSet<CellKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|cell, _| loaded.contains(cell));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cells(&self) -> Vec<CellKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
