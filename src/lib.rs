// ============================================================================
// Supply Census Library
// ============================================================================

pub mod core;
pub mod config;
pub mod host;
pub mod tracker;
pub mod cache;
pub mod limiter;
pub mod store;
pub mod persistence;
pub mod scanner;

// Re-export main types for convenience
pub use crate::core::{
    BlockPos, CellKey, CensusError, GoodId, GoodRegistry, GoodTotals, ItemStack, RealmId, Result,
    StorageUnit,
};
pub use config::CensusConfig;
pub use host::{
    AssumeHealthy, ChangeEvent, ChangeFeed, ChangeKind, HostHandle, HostPump, HostWorld,
    LoadProbe, LocalChangeFeed, host_channel,
};
pub use tracker::DirtyCellTracker;
pub use cache::{CellCache, CellCacheEntry};
pub use limiter::ContributionLimiter;
pub use store::{AggregateSnapshot, AggregateStore};
pub use persistence::{PersistedSnapshot, SNAPSHOT_FORMAT_VERSION, SnapshotPersistence};
pub use scanner::{CensusService, CensusStatsSnapshot, ScanMode, ScanOutcome};
