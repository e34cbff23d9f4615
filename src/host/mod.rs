//! Boundary to the host simulation.
//!
//! All world state lives on the host's single-threaded context. The scanner
//! never touches it directly: it posts jobs through a [`HostHandle`] and the
//! host runs them from its own step via [`HostPump::run_pending`].

pub mod executor;
pub mod feed;
pub mod load;

pub use executor::{HostHandle, HostPump, host_channel};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, ChangeListener, LocalChangeFeed, SubscriptionId};
pub use load::{AssumeHealthy, LoadProbe, detect_load_probe};

use crate::core::{CellKey, StorageUnit};
use std::sync::Arc;

/// Read access to host world state. Only ever called on the host context.
pub trait HostWorld {
    /// Every cell currently loaded, across all realms.
    fn loaded_cells(&self) -> Vec<CellKey>;

    /// Storage units placed in one cell. Unloaded cells yield nothing.
    fn storage_units(&self, cell: &CellKey) -> Vec<StorageUnit>;

    /// Optional load metric capability. Hosts without one are assumed healthy.
    fn load_probe(&self) -> Option<Arc<dyn LoadProbe>> {
        None
    }
}
