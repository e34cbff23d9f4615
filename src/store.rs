//! The published aggregate read by the pricing engine.

use crate::core::{GoodId, GoodTotals};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of one scan cycle. Immutable once published.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateSnapshot {
    pub totals: GoodTotals,
    /// `None` until the first cycle completes or a persisted snapshot loads.
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Storage units covered. Lower than usual when the cycle was cut short.
    pub unit_count: usize,
    pub cells_scanned: usize,
    pub cells_cached: usize,
    pub full_scan: bool,
    pub partial: bool,
}

impl AggregateSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn quantity_of(&self, good: GoodId) -> u64 {
        self.totals.get(&good).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Single-writer, many-reader holder of the current snapshot.
///
/// Readers get an `Arc` to a complete snapshot and never observe a
/// half-merged table.
pub struct AggregateStore {
    current: ArcSwap<AggregateSnapshot>,
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(AggregateSnapshot::empty()),
        }
    }

    pub fn publish(&self, snapshot: AggregateSnapshot) -> Arc<AggregateSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        snapshot
    }

    pub fn current(&self) -> Arc<AggregateSnapshot> {
        self.current.load_full()
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        self.current.load().completed_at
    }
}
