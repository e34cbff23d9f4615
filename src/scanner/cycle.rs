use super::plan::{ScanMode, choose_mode, plan_scan};
use super::stats::CensusStats;
use super::tally::{CountingRules, tally_cell};
use crate::cache::{CellCache, CellCacheEntry};
use crate::config::CensusConfig;
use crate::core::{CensusError, CellKey, GoodTotals, Result, StorageUnit, merge_totals};
use crate::host::{AssumeHealthy, HostHandle, LoadProbe};
use crate::limiter::ContributionLimiter;
use crate::persistence::SnapshotPersistence;
use crate::store::{AggregateSnapshot, AggregateStore};
use crate::tracker::DirtyCellTracker;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};

/// How one scan attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanOutcome {
    Completed {
        mode: ScanMode,
        cells_scanned: usize,
        cells_cached: usize,
        unit_count: usize,
    },
    /// Host load degraded mid-scan; the partial total was still published.
    Aborted {
        mode: ScanMode,
        cells_scanned: usize,
        cells_skipped: usize,
        unit_count: usize,
    },
    /// Host load was too low to start, or could not be read. Nothing published.
    SkippedForLoad { load: Option<f64> },
    /// Loaded cells could not be enumerated. The previous snapshot stays.
    Failed { reason: String },
    AlreadyRunning,
}

impl ScanOutcome {
    pub fn published(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Aborted { .. })
    }
}

/// State shared by the scan worker, triggered scans and the service facade.
pub(crate) struct CensusCore {
    pub(crate) config: CensusConfig,
    pub(crate) host: HostHandle,
    pub(crate) tracker: Arc<DirtyCellTracker>,
    pub(crate) cache: CellCache,
    pub(crate) store: Arc<AggregateStore>,
    pub(crate) persistence: Option<Arc<SnapshotPersistence>>,
    pub(crate) stats: CensusStats,
    load_probe: RwLock<Arc<dyn LoadProbe>>,
    limiter: ContributionLimiter,
    rules: CountingRules,
    scanning: AtomicBool,
    cycles_started: AtomicU64,
}

impl CensusCore {
    pub(crate) fn new(
        config: CensusConfig,
        host: HostHandle,
        persistence: Option<Arc<SnapshotPersistence>>,
    ) -> Self {
        Self {
            limiter: ContributionLimiter::from_config(&config),
            rules: CountingRules::from_config(&config),
            config,
            host,
            tracker: Arc::new(DirtyCellTracker::new()),
            cache: CellCache::new(),
            store: Arc::new(AggregateStore::new()),
            persistence,
            stats: CensusStats::default(),
            load_probe: RwLock::new(Arc::new(AssumeHealthy)),
            scanning: AtomicBool::new(false),
            cycles_started: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_load_probe(&self, probe: Arc<dyn LoadProbe>) {
        *self
            .load_probe
            .write()
            .unwrap_or_else(PoisonError::into_inner) = probe;
    }

    /// Excluded realms are never gathered, so their marks would never drain.
    pub(crate) fn mark_dirty(&self, cell: &CellKey) {
        if !self.config.excludes_realm(&cell.realm) {
            self.tracker.mark_dirty(cell.clone());
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// One scan attempt. Callers must hold a [`ScanGuard`].
    pub(crate) async fn run_cycle(&self, force_full: bool) -> ScanOutcome {
        let started = Instant::now();

        match self.read_load().await {
            Ok(load) if load < self.config.min_load_to_scan => {
                event!(
                    Level::INFO,
                    load,
                    minimum = self.config.min_load_to_scan,
                    "census scan skipped: host under load"
                );
                self.stats.record_skipped_for_load();
                return ScanOutcome::SkippedForLoad { load: Some(load) };
            }
            Ok(_) => {}
            Err(err) => {
                self.note_host_error(&err);
                event!(Level::WARN, error = %err, "census scan skipped: load metric unavailable");
                self.stats.record_skipped_for_load();
                return ScanOutcome::SkippedForLoad { load: None };
            }
        }

        let loaded = match self.gather_loaded_cells().await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.note_host_error(&err);
                event!(Level::ERROR, error = %err, "census scan failed: loaded cells unavailable");
                self.stats.record_failed_cycle();
                return ScanOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let cycle = self.cycles_started.fetch_add(1, Ordering::Relaxed);
        let mode = choose_mode(&self.config, cycle, force_full);
        let span = info_span!("census.scan", cycle, mode = ?mode, loaded = loaded.len());
        self.scan_loaded(loaded, mode, started).instrument(span).await
    }

    async fn scan_loaded(
        &self,
        loaded: HashSet<CellKey>,
        mode: ScanMode,
        started: Instant,
    ) -> ScanOutcome {
        let plan = plan_scan(
            &loaded,
            mode,
            &self.tracker,
            &self.cache,
            Utc::now(),
            self.config.cache_ttl(),
        );

        let mut merged = GoodTotals::new();
        let mut unit_count = 0usize;
        let mut cache_writes = Vec::with_capacity(plan.to_scan.len());
        let mut unscanned: Vec<CellKey> = Vec::new();
        let mut aborted = false;

        let batches: Vec<&[CellKey]> = plan.to_scan.chunks(self.config.batch_size.max(1)).collect();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                if index % self.config.load_check_every_batches.max(1) == 0
                    && self.load_degraded().await
                {
                    aborted = true;
                    for rest in &batches[index..] {
                        unscanned.extend(rest.iter().cloned());
                    }
                    break;
                }
                sleep(self.config.batch_delay()).await;
            }

            match self.enumerate_batch(batch).await {
                Ok(enumerated) => {
                    for (cell, units) in enumerated {
                        let tally = tally_cell(&cell, &units, &loaded, &self.rules);
                        let clamped = self.limiter.clamp(&tally.totals);
                        merge_totals(&mut merged, &clamped);
                        unit_count += tally.unit_count;
                        cache_writes.push((
                            cell,
                            CellCacheEntry::new(clamped, tally.unit_count, Utc::now()),
                        ));
                    }
                }
                Err(err) => {
                    self.note_host_error(&err);
                    self.stats.record_failed_batch();
                    event!(
                        Level::WARN,
                        batch = index,
                        cells = batch.len(),
                        error = %err,
                        "census batch failed; counting it as empty"
                    );
                    unscanned.extend(batch.iter().cloned());
                }
            }
        }

        // dirty cells we never reached keep their priority
        for cell in &unscanned {
            if plan.drained_dirty.contains(cell) {
                self.tracker.mark_dirty(cell.clone());
            }
        }

        let cells_cached = plan.from_cache.len();
        for (_, entry) in &plan.from_cache {
            merge_totals(&mut merged, &entry.totals);
            unit_count += entry.unit_count;
        }

        let cells_scanned = cache_writes.len();
        if self.config.cache_enabled {
            for (cell, entry) in cache_writes {
                self.cache.put(cell, entry);
            }
        }

        let snapshot = AggregateSnapshot {
            totals: merged,
            completed_at: Some(Utc::now()),
            duration_ms: started.elapsed().as_millis() as u64,
            unit_count,
            cells_scanned,
            cells_cached,
            full_scan: mode == ScanMode::Full,
            partial: !unscanned.is_empty(),
        };
        let published = self.store.publish(snapshot);
        let pruned = self.cache.prune_except(&loaded);
        self.stats.record_published(aborted, cells_scanned, cells_cached);

        event!(
            Level::INFO,
            cells_scanned,
            cells_cached,
            cells_unscanned = unscanned.len(),
            units = unit_count,
            goods = published.totals.len(),
            duration_ms = published.duration_ms,
            pruned,
            "census scan published"
        );

        if self.persistence.is_some()
            && self.stats.cycles_published() % self.config.persist_every_cycles.max(1) == 0
        {
            self.persist_snapshot(published).await;
        }

        if aborted {
            ScanOutcome::Aborted {
                mode,
                cells_scanned,
                cells_skipped: unscanned.len(),
                unit_count,
            }
        } else {
            ScanOutcome::Completed {
                mode,
                cells_scanned,
                cells_cached,
                unit_count,
            }
        }
    }

    /// Writes `snapshot` to disk off the async workers. Failures are logged
    /// and counted; the in-memory snapshot stays authoritative.
    pub(crate) async fn persist_snapshot(&self, snapshot: Arc<AggregateSnapshot>) -> bool {
        let Some(persistence) = self.persistence.clone() else {
            return false;
        };

        let result = tokio::task::spawn_blocking(move || persistence.save(&snapshot))
            .await
            .map_err(|err| CensusError::Worker(format!("snapshot save task: {}", err)))
            .and_then(|saved| saved);

        match result {
            Ok(()) => true,
            Err(err) => {
                self.stats.record_persist_failure();
                event!(Level::ERROR, error = %err, "census snapshot save failed");
                false
            }
        }
    }

    /// Publishes the on-disk snapshot if one is usable and nothing newer is
    /// in memory yet.
    pub(crate) async fn restore_persisted(&self) -> bool {
        let Some(persistence) = self.persistence.clone() else {
            return false;
        };
        if !self.store.current().is_empty() {
            return false;
        }

        let result = tokio::task::spawn_blocking(move || persistence.load())
            .await
            .map_err(|err| CensusError::Worker(format!("snapshot load task: {}", err)))
            .and_then(|loaded| loaded);

        match result {
            Ok(Some(snapshot)) => {
                event!(
                    Level::INFO,
                    goods = snapshot.totals.len(),
                    "restored census snapshot from disk"
                );
                self.store.publish(snapshot);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.stats.record_persist_failure();
                event!(Level::WARN, error = %err, "ignoring unreadable census snapshot");
                false
            }
        }
    }

    async fn read_load(&self) -> Result<f64> {
        let probe = self
            .load_probe
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.host
            .call("load_metric", move |_world| probe.read_load())
            .await
    }

    async fn load_degraded(&self) -> bool {
        match self.read_load().await {
            Ok(load) if load < self.config.abort_load_threshold => {
                event!(
                    Level::WARN,
                    load,
                    threshold = self.config.abort_load_threshold,
                    "census scan cut short: host load degraded"
                );
                true
            }
            Ok(_) => false,
            Err(err) => {
                self.note_host_error(&err);
                event!(Level::WARN, error = %err, "census scan cut short: load metric unavailable");
                true
            }
        }
    }

    async fn gather_loaded_cells(&self) -> Result<HashSet<CellKey>> {
        let cells = self
            .host
            .call("loaded_cells", |world| world.loaded_cells())
            .await?;

        Ok(cells
            .into_iter()
            .filter(|cell| !self.config.excludes_realm(&cell.realm))
            .collect())
    }

    async fn enumerate_batch(&self, batch: &[CellKey]) -> Result<Vec<(CellKey, Vec<StorageUnit>)>> {
        let cells = batch.to_vec();
        self.host
            .call("storage_units", move |world| {
                cells
                    .into_iter()
                    .map(|cell| {
                        let units = world.storage_units(&cell);
                        (cell, units)
                    })
                    .collect()
            })
            .await
    }

    fn note_host_error(&self, err: &CensusError) {
        if err.is_host_timeout() {
            self.stats.record_host_timeout();
        }
    }
}

/// Single-flight token: at most one live guard per core, released on drop.
pub(crate) struct ScanGuard {
    core: Arc<CensusCore>,
}

impl ScanGuard {
    pub(crate) fn try_acquire(core: &Arc<CensusCore>) -> Option<Self> {
        core.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { core: core.clone() })
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.core.scanning.store(false, Ordering::Release);
    }
}
