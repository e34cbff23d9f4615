//! Scan orchestration and the service facade wired by the host.

mod cycle;
pub mod plan;
pub mod stats;
pub mod tally;

pub use cycle::ScanOutcome;
pub use plan::{ScanMode, ScanPlan, choose_mode, plan_scan};
pub use stats::{CensusStats, CensusStatsSnapshot};
pub use tally::{CellTally, CountingRules, tally_cell};

use crate::config::CensusConfig;
use crate::core::{CellKey, CensusError, GoodRegistry, GoodTotals, Result};
use crate::host::{ChangeEvent, ChangeFeed, HostHandle, SubscriptionId, detect_load_probe};
use crate::persistence::SnapshotPersistence;
use crate::store::{AggregateSnapshot, AggregateStore};
use chrono::{DateTime, Utc};
use cycle::{CensusCore, ScanGuard};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{Level, event};

const IDLE_POLL: Duration = Duration::from_millis(25);

/// Supply census for one host world.
///
/// The host constructs one instance at startup, calls [`start`](Self::start)
/// to subscribe to change events and launch the scan worker, and
/// [`stop`](Self::stop) at shutdown. Readers only ever see the latest
/// published [`AggregateSnapshot`].
pub struct CensusService {
    core: Arc<CensusCore>,
    feed: Arc<dyn ChangeFeed>,
    worker: Mutex<Option<CensusWorker>>,
    runtime: RwLock<Option<Handle>>,
}

struct CensusWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    subscription: SubscriptionId,
}

impl Drop for CensusWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

impl CensusService {
    pub fn new(
        config: CensusConfig,
        host: HostHandle,
        feed: Arc<dyn ChangeFeed>,
        registry: Arc<GoodRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();

        let host = host.with_timeout(config.host_call_timeout());
        let persistence = config.persist_enabled.then(|| {
            Arc::new(
                SnapshotPersistence::new(config.snapshot_path.clone(), registry)
                    .with_max_age_secs(config.max_snapshot_age_secs),
            )
        });

        Ok(Self {
            core: Arc::new(CensusCore::new(config, host, persistence)),
            feed,
            worker: Mutex::new(None),
            runtime: RwLock::new(None),
        })
    }

    /// Restores the on-disk snapshot, detects the host load metric,
    /// subscribes to change events and launches the periodic scan worker.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(CensusError::AlreadyRunning);
        }

        self.core.restore_persisted().await;

        let offered = match self
            .core
            .host
            .call("load_probe", |world| world.load_probe())
            .await
        {
            Ok(offered) => offered,
            Err(err) => {
                event!(Level::WARN, error = %err, "load metric detection failed");
                None
            }
        };
        self.core.set_load_probe(detect_load_probe(offered));

        let core = self.core.clone();
        let subscription = self.feed.subscribe(Arc::new(move |event: &ChangeEvent| {
            for cell in event.affected_cells() {
                core.mark_dirty(cell);
            }
        }));

        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = Some(Handle::current());

        let (stop_tx, stop_rx) = oneshot::channel();
        let join_handle = spawn_scan_worker(self.core.clone(), stop_rx);
        *worker = Some(CensusWorker {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
            subscription,
        });

        event!(
            Level::INFO,
            interval_secs = self.core.config.scan_interval_secs,
            "census service started"
        );
        Ok(())
    }

    /// Stops the worker, unsubscribes from the host and writes a final
    /// snapshot when persistence is enabled.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.worker.lock().await;
        let Some(mut worker) = guard.take() else {
            return Err(CensusError::NotRunning);
        };

        self.feed.unsubscribe(worker.subscription);
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = None;

        if let Some(stop_tx) = worker.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = worker.join_handle.take() {
            join_handle
                .await
                .map_err(|err| CensusError::Worker(format!("scan worker join: {}", err)))?;
        }

        // a triggered scan may still be running on its own task
        self.wait_idle(self.core.config.host_call_timeout()).await;

        let snapshot = self.core.store.current();
        if !snapshot.is_empty() {
            self.core.persist_snapshot(snapshot).await;
        }

        event!(Level::INFO, "census service stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Starts a scan in the background. Returns `false` when a scan is
    /// already in flight or the service has not been started.
    pub fn trigger_scan(&self) -> bool {
        self.spawn_scan(false)
    }

    /// Like [`trigger_scan`](Self::trigger_scan), but ignores the cell cache.
    pub fn force_full_scan(&self) -> bool {
        self.spawn_scan(true)
    }

    /// Runs one scan on the calling task and reports how it ended.
    pub async fn scan_now(&self, force_full: bool) -> ScanOutcome {
        let Some(_guard) = ScanGuard::try_acquire(&self.core) else {
            return ScanOutcome::AlreadyRunning;
        };
        self.core.run_cycle(force_full).await
    }

    /// Requests a scan and waits up to `ceiling` for the scanner to go idle,
    /// then returns the best snapshot available. Never waits longer.
    pub async fn force_refresh(&self, ceiling: Duration) -> Arc<AggregateSnapshot> {
        if !self.trigger_scan() && !self.is_scanning() {
            // not started: run inline, bounded by the same ceiling
            let _ = timeout(ceiling, self.scan_now(false)).await;
            return self.snapshot();
        }

        self.wait_idle(ceiling).await;
        self.snapshot()
    }

    /// Cells in excluded realms are ignored.
    pub fn mark_dirty(&self, cell: CellKey) {
        self.core.mark_dirty(&cell);
    }

    pub fn is_scanning(&self) -> bool {
        self.core.is_scanning()
    }

    /// Read handle for consumers such as the pricing engine.
    pub fn store(&self) -> Arc<AggregateStore> {
        self.core.store.clone()
    }

    pub fn snapshot(&self) -> Arc<AggregateSnapshot> {
        self.core.store.current()
    }

    pub fn current_totals(&self) -> GoodTotals {
        self.snapshot().totals.clone()
    }

    pub fn last_scan_timestamp(&self) -> Option<DateTime<Utc>> {
        self.core.store.last_completed_at()
    }

    pub fn last_scan_duration_ms(&self) -> u64 {
        self.snapshot().duration_ms
    }

    pub fn last_unit_count(&self) -> usize {
        self.snapshot().unit_count
    }

    pub fn stats(&self) -> CensusStatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn config(&self) -> &CensusConfig {
        &self.core.config
    }

    pub fn cached_cells(&self) -> usize {
        self.core.cache.len()
    }

    pub fn dirty_cells(&self) -> usize {
        self.core.tracker.len()
    }

    fn spawn_scan(&self, force_full: bool) -> bool {
        let runtime = self
            .runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(runtime) = runtime else {
            event!(Level::DEBUG, "census scan rejected: service not started");
            return false;
        };

        let Some(guard) = ScanGuard::try_acquire(&self.core) else {
            event!(Level::DEBUG, "census scan rejected: scan already in progress");
            return false;
        };

        let core = self.core.clone();
        runtime.spawn(async move {
            let _guard = guard;
            core.run_cycle(force_full).await;
        });
        true
    }

    async fn wait_idle(&self, ceiling: Duration) {
        let _ = timeout(ceiling, async {
            while self.core.is_scanning() {
                sleep(IDLE_POLL).await;
            }
        })
        .await;
    }
}

impl Drop for CensusService {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            self.feed.unsubscribe(worker.subscription);
        }
    }
}

fn spawn_scan_worker(core: Arc<CensusCore>, mut stop_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
    let period = core.config.scan_interval();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let Some(_guard) = ScanGuard::try_acquire(&core) else {
                        event!(Level::DEBUG, "scheduled census scan skipped: scan already in progress");
                        continue;
                    };
                    tokio::select! {
                        _ = core.run_cycle(false) => {}
                        _ = &mut stop_rx => break,
                    }
                }
            }
        }
    })
}
