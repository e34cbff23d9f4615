use crate::core::CellKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Placed,
    Removed,
    StorageClosed,
    /// The cell left memory; its contents must be re-verified on next load.
    Unloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub cell: CellKey,
    pub kind: ChangeKind,
    /// Cell of the other half when the change touched a multi-part unit that
    /// straddles a cell border.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<CellKey>,
}

impl ChangeEvent {
    pub fn new(cell: CellKey, kind: ChangeKind) -> Self {
        Self {
            cell,
            kind,
            partner: None,
        }
    }

    pub fn with_partner(mut self, partner: CellKey) -> Self {
        if partner != self.cell {
            self.partner = Some(partner);
        }
        self
    }

    /// Cells whose contents this change may affect.
    pub fn affected_cells(&self) -> impl Iterator<Item = &CellKey> {
        std::iter::once(&self.cell).chain(self.partner.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Host notification stream for structural world changes.
///
/// Listeners may be invoked from any host context and must not block.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, listener: ChangeListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process fan-out feed for hosts that do not bring their own.
#[derive(Default)]
pub struct LocalChangeFeed {
    listeners: RwLock<HashMap<SubscriptionId, ChangeListener>>,
    next_id: AtomicU64,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: ChangeEvent) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self, listener: ChangeListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}
