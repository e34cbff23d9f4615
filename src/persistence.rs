//! On-disk mirror of the published aggregate.

use crate::core::{CensusError, GoodRegistry, GoodTotals, Result};
use crate::store::AggregateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{Level, event};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_MAX_SNAPSHOT_AGE_SECS: u64 = 3_600;

/// File layout of the mirror. Goods are keyed by name so ids may be
/// renumbered between builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub totals: BTreeMap<String, u64>,
    /// Epoch seconds
    pub completed_at: i64,
    pub format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRejection {
    FormatVersion { found: u32, expected: u32 },
    TooOld { age_secs: i64, max_age_secs: u64 },
}

impl std::fmt::Display for SnapshotRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FormatVersion { found, expected } => {
                write!(f, "format version {found} does not match {expected}")
            }
            Self::TooOld {
                age_secs,
                max_age_secs,
            } => write!(f, "snapshot is {age_secs}s old, limit is {max_age_secs}s"),
        }
    }
}

impl PersistedSnapshot {
    pub fn from_aggregate(snapshot: &AggregateSnapshot, registry: &GoodRegistry) -> Self {
        let mut totals = BTreeMap::new();
        for (good, quantity) in &snapshot.totals {
            match registry.name_of(*good) {
                Some(name) => {
                    totals.insert(name.to_string(), *quantity);
                }
                None => event!(Level::DEBUG, good = %good, "unnamed good left out of snapshot"),
            }
        }

        Self {
            totals,
            completed_at: snapshot
                .completed_at
                .unwrap_or_else(Utc::now)
                .timestamp(),
            format_version: SNAPSHOT_FORMAT_VERSION,
        }
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            CensusError::Io(format!("read snapshot '{}': {}", path.display(), err))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            CensusError::Serialization(format!("parse snapshot '{}': {}", path.display(), err))
        })
    }

    /// Why this snapshot may not be used at `now`, if it may not.
    pub fn rejection(&self, now: DateTime<Utc>, max_age_secs: u64) -> Option<SnapshotRejection> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Some(SnapshotRejection::FormatVersion {
                found: self.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let age_secs = now.timestamp() - self.completed_at;
        if age_secs > max_age_secs.min(i64::MAX as u64) as i64 {
            return Some(SnapshotRejection::TooOld {
                age_secs,
                max_age_secs,
            });
        }

        None
    }

    pub fn ensure_usable(&self, now: DateTime<Utc>, max_age_secs: u64) -> Result<()> {
        match self.rejection(now, max_age_secs) {
            Some(rejection) => Err(CensusError::IncompatibleSnapshot(rejection.to_string())),
            None => Ok(()),
        }
    }

    /// Converts back to an aggregate, silently dropping goods the running
    /// build no longer knows.
    pub fn into_aggregate(self, registry: &GoodRegistry) -> AggregateSnapshot {
        let mut totals = GoodTotals::new();
        for (name, quantity) in self.totals {
            match registry.id_of(&name) {
                Some(good) => {
                    totals.insert(good, quantity);
                }
                None => event!(Level::DEBUG, good = %name, "dropping unknown good from snapshot"),
            }
        }

        AggregateSnapshot {
            totals,
            completed_at: DateTime::from_timestamp(self.completed_at, 0),
            ..AggregateSnapshot::default()
        }
    }
}

/// Saves and restores the aggregate as a single JSON file, replaced whole on
/// every save.
pub struct SnapshotPersistence {
    path: PathBuf,
    max_age_secs: u64,
    registry: Arc<GoodRegistry>,
}

impl SnapshotPersistence {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<GoodRegistry>) -> Self {
        Self {
            path: path.into(),
            max_age_secs: DEFAULT_MAX_SNAPSHOT_AGE_SECS,
            registry,
        }
    }

    pub fn with_max_age_secs(mut self, max_age_secs: u64) -> Self {
        self.max_age_secs = max_age_secs;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &AggregateSnapshot) -> Result<()> {
        let persisted = PersistedSnapshot::from_aggregate(snapshot, &self.registry);
        let json = serde_json::to_vec_pretty(&persisted)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|err| {
            CensusError::Io(format!("create snapshot directory '{}': {}", dir.display(), err))
        })?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| {
            CensusError::Io(format!("replace snapshot '{}': {}", self.path.display(), err))
        })?;

        event!(
            Level::DEBUG,
            path = %self.path.display(),
            goods = persisted.totals.len(),
            "census snapshot saved"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<AggregateSnapshot>> {
        self.load_at(Utc::now())
    }

    /// Loads the mirror as seen at `now`. A missing, stale or
    /// version-mismatched file yields `None`; unreadable files are errors.
    pub fn load_at(&self, now: DateTime<Utc>) -> Result<Option<AggregateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let persisted = PersistedSnapshot::read_from(&self.path)?;
        if let Some(rejection) = persisted.rejection(now, self.max_age_secs) {
            event!(
                Level::INFO,
                path = %self.path.display(),
                reason = %rejection,
                "discarding persisted census snapshot"
            );
            return Ok(None);
        }

        Ok(Some(persisted.into_aggregate(&self.registry)))
    }
}
