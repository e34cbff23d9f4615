use super::goods::GoodId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Cells are 16x16 columns of blocks: `cell = block >> CELL_SHIFT`.
pub const CELL_SHIFT: u32 = 4;

/// Per-good quantity table used for cell tallies and aggregate totals.
pub type GoodTotals = HashMap<GoodId, u64>;

/// Adds every quantity in `from` into `into`, saturating on overflow.
pub fn merge_totals(into: &mut GoodTotals, from: &GoodTotals) {
    for (good, quantity) in from {
        let slot = into.entry(*good).or_insert(0);
        *slot = slot.saturating_add(*quantity);
    }
}

// ============================================================================
// Spatial identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RealmId(String);

impl RealmId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RealmId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of one fixed spatial partition.
///
/// Keys are only ever built from a realm and cell coordinates, or derived from
/// a block position with [`CellKey::containing`], so a partition has exactly
/// one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub realm: RealmId,
    pub x: i32,
    pub z: i32,
}

impl CellKey {
    pub fn new(realm: impl Into<RealmId>, x: i32, z: i32) -> Self {
        Self {
            realm: realm.into(),
            x,
            z,
        }
    }

    /// The cell holding a block. Arithmetic shift floors negative coordinates.
    pub fn containing(pos: &BlockPos) -> Self {
        Self {
            realm: pos.realm.clone(),
            x: pos.x >> CELL_SHIFT,
            z: pos.z >> CELL_SHIFT,
        }
    }

    /// The four cells sharing an edge with this one.
    pub fn neighbours(&self) -> [CellKey; 4] {
        [
            Self::new(self.realm.clone(), self.x - 1, self.z),
            Self::new(self.realm.clone(), self.x + 1, self.z),
            Self::new(self.realm.clone(), self.x, self.z - 1),
            Self::new(self.realm.clone(), self.x, self.z + 1),
        ]
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.realm, self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub realm: RealmId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(realm: impl Into<RealmId>, x: i32, y: i32, z: i32) -> Self {
        Self {
            realm: realm.into(),
            x,
            y,
            z,
        }
    }

    pub fn cell(&self) -> CellKey {
        CellKey::containing(self)
    }
}

// ============================================================================
// Storage contents
// ============================================================================

/// One stack of a good inside a storage unit. `nested` holds the contents of
/// portable storage (a box carried inside a chest); hosts only populate it for
/// goods that can themselves hold goods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub good: GoodId,
    pub quantity: u64,
    #[serde(default)]
    pub nested: Vec<ItemStack>,
}

impl ItemStack {
    pub fn new(good: GoodId, quantity: u64) -> Self {
        Self {
            good,
            quantity,
            nested: Vec::new(),
        }
    }

    pub fn with_nested(mut self, nested: Vec<ItemStack>) -> Self {
        self.nested = nested;
        self
    }
}

/// A placed container as the host reports it.
///
/// Two-part containers are reported once per half; both halves expose the
/// combined contents and name each other through `partner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub location: BlockPos,
    pub kind: String,
    pub contents: Vec<ItemStack>,
    #[serde(default)]
    pub partner: Option<BlockPos>,
}

impl StorageUnit {
    pub fn new(location: BlockPos, kind: impl Into<String>, contents: Vec<ItemStack>) -> Self {
        Self {
            location,
            kind: kind.into(),
            contents,
            partner: None,
        }
    }

    pub fn with_partner(mut self, partner: BlockPos) -> Self {
        self.partner = Some(partner);
        self
    }

    pub fn is_multi_part(&self) -> bool {
        self.partner.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.iter().all(|stack| stack.quantity == 0)
    }

    /// Stable identity shared by both halves of a multi-part unit: the lesser
    /// of the two locations. Single units are identified by their location.
    pub fn identity(&self) -> &BlockPos {
        match &self.partner {
            Some(partner) if partner < &self.location => partner,
            _ => &self.location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_containing_floors_negative_coordinates() {
        let pos = BlockPos::new("overworld", -1, 64, 17);
        assert_eq!(CellKey::containing(&pos), CellKey::new("overworld", -1, 1));

        let origin = BlockPos::new("overworld", 15, 0, 0);
        assert_eq!(origin.cell(), CellKey::new("overworld", 0, 0));
    }

    #[test]
    fn test_multi_part_identity_is_symmetric() {
        let left = BlockPos::new("overworld", 4, 64, 4);
        let right = BlockPos::new("overworld", 5, 64, 4);

        let a = StorageUnit::new(left.clone(), "chest", vec![]).with_partner(right.clone());
        let b = StorageUnit::new(right, "chest", vec![]).with_partner(left.clone());

        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), &left);
    }

    #[test]
    fn test_unit_with_only_zero_stacks_is_empty() {
        let unit = StorageUnit::new(
            BlockPos::new("overworld", 0, 0, 0),
            "barrel",
            vec![ItemStack::new(GoodId(1), 0)],
        );
        assert!(unit.is_empty());
    }

    #[test]
    fn test_merge_totals_adds_per_good() {
        let mut into = GoodTotals::from([(GoodId(1), 5)]);
        let from = GoodTotals::from([(GoodId(1), 3), (GoodId(2), 7)]);
        merge_totals(&mut into, &from);
        assert_eq!(into.get(&GoodId(1)), Some(&8));
        assert_eq!(into.get(&GoodId(2)), Some(&7));
    }
}
