use crate::core::{CensusError, RealmId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Census scanner configuration
///
/// Every field has a default, so a config file only needs to name the options
/// it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CensusConfig {
    /// Seconds between scheduled scan cycles
    pub scan_interval_secs: u64,

    /// Maximum total units a single cell may contribute
    pub per_cell_cap: u64,

    /// Maximum units of one good a single cell may contribute
    pub per_good_cap: u64,

    /// Host load (0-20) below which a cycle is skipped entirely
    pub min_load_to_scan: f64,

    /// Host load below which a running cycle stops scanning further batches
    pub abort_load_threshold: f64,

    /// Re-read the host load every N batches
    pub load_check_every_batches: usize,

    pub cache_enabled: bool,

    /// Age after which a cached cell is rescanned even if not dirty
    pub cache_ttl_secs: u64,

    /// Every Nth cycle ignores the cache and rescans all loaded cells
    pub full_rescan_every_cycles: u64,

    /// Cells enumerated per host round-trip
    pub batch_size: usize,

    /// Pause between batches so host work spreads over several host steps
    pub batch_delay_ms: u64,

    /// Ceiling for any single host round-trip
    pub host_call_timeout_ms: u64,

    /// Count one level of portable storage found inside storage units
    pub include_nested_storage: bool,

    /// Storage unit kinds to count; empty means every kind
    pub included_kinds: BTreeSet<String>,

    pub excluded_realms: BTreeSet<String>,

    pub persist_enabled: bool,

    /// Mirror the published snapshot to disk every N completed cycles
    pub persist_every_cycles: u64,

    pub snapshot_path: PathBuf,

    /// Snapshots older than this are discarded at startup
    pub max_snapshot_age_secs: u64,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            per_cell_cap: 10_000,
            per_good_cap: 5_000,
            min_load_to_scan: 18.0,
            abort_load_threshold: 15.0,
            load_check_every_batches: 5,
            cache_enabled: true,
            cache_ttl_secs: 600,
            full_rescan_every_cycles: 6,
            batch_size: 16,
            batch_delay_ms: 50,
            host_call_timeout_ms: 5_000,
            include_nested_storage: true,
            included_kinds: BTreeSet::new(),
            excluded_realms: BTreeSet::new(),
            persist_enabled: true,
            persist_every_cycles: 1,
            snapshot_path: PathBuf::from("data/supply_census.json"),
            max_snapshot_age_secs: 3_600,
        }
    }
}

impl CensusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            CensusError::Io(format!("read config '{}': {}", path.display(), err))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn scan_interval_secs(mut self, secs: u64) -> Self {
        self.scan_interval_secs = secs;
        self
    }

    pub fn caps(mut self, per_cell_cap: u64, per_good_cap: u64) -> Self {
        self.per_cell_cap = per_cell_cap;
        self.per_good_cap = per_good_cap;
        self
    }

    pub fn load_thresholds(mut self, min_load_to_scan: f64, abort_load_threshold: f64) -> Self {
        self.min_load_to_scan = min_load_to_scan;
        self.abort_load_threshold = abort_load_threshold;
        self
    }

    pub fn load_check_every_batches(mut self, batches: usize) -> Self {
        self.load_check_every_batches = batches;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn full_rescan_every_cycles(mut self, cycles: u64) -> Self {
        self.full_rescan_every_cycles = cycles;
        self
    }

    pub fn batch_size(mut self, cells: usize) -> Self {
        self.batch_size = cells;
        self
    }

    pub fn batch_delay_ms(mut self, delay_ms: u64) -> Self {
        self.batch_delay_ms = delay_ms;
        self
    }

    pub fn host_call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.host_call_timeout_ms = timeout_ms;
        self
    }

    pub fn include_nested_storage(mut self, include: bool) -> Self {
        self.include_nested_storage = include;
        self
    }

    pub fn include_kind(mut self, kind: impl Into<String>) -> Self {
        self.included_kinds.insert(kind.into());
        self
    }

    pub fn exclude_realm(mut self, realm: impl Into<String>) -> Self {
        self.excluded_realms.insert(realm.into());
        self
    }

    pub fn persistence(mut self, enabled: bool, path: impl Into<PathBuf>) -> Self {
        self.persist_enabled = enabled;
        self.snapshot_path = path.into();
        self
    }

    pub fn persist_every_cycles(mut self, cycles: u64) -> Self {
        self.persist_every_cycles = cycles;
        self
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn host_call_timeout(&self) -> Duration {
        Duration::from_millis(self.host_call_timeout_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs.min(i64::MAX as u64) as i64)
    }

    pub fn excludes_realm(&self, realm: &RealmId) -> bool {
        self.excluded_realms.contains(realm.as_str())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(CensusError::InvalidConfig(
                "scan_interval_secs must be > 0".to_string(),
            ));
        }

        if self.per_cell_cap == 0 || self.per_good_cap == 0 {
            return Err(CensusError::InvalidConfig(
                "per_cell_cap and per_good_cap must be > 0".to_string(),
            ));
        }

        if !(0.0..=20.0).contains(&self.min_load_to_scan) {
            return Err(CensusError::InvalidConfig(format!(
                "min_load_to_scan must be within 0..=20, got {}",
                self.min_load_to_scan
            )));
        }

        if self.abort_load_threshold > self.min_load_to_scan {
            return Err(CensusError::InvalidConfig(
                "abort_load_threshold cannot exceed min_load_to_scan".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(CensusError::InvalidConfig("batch_size must be > 0".to_string()));
        }

        if self.host_call_timeout_ms == 0 {
            return Err(CensusError::InvalidConfig(
                "host_call_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.persist_enabled && self.snapshot_path.as_os_str().is_empty() {
            return Err(CensusError::InvalidConfig(
                "snapshot_path is required when persistence is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Clamps the cycle counters to at least one so they can be used as
    /// divisors.
    pub fn normalized(mut self) -> Self {
        self.load_check_every_batches = self.load_check_every_batches.max(1);
        self.full_rescan_every_cycles = self.full_rescan_every_cycles.max(1);
        self.persist_every_cycles = self.persist_every_cycles.max(1);
        self
    }
}
