pub mod error;
pub mod goods;
pub mod types;

pub use error::{CensusError, Result};
pub use goods::{GoodId, GoodRegistry};
pub use types::{
    BlockPos, CELL_SHIFT, CellKey, GoodTotals, ItemStack, RealmId, StorageUnit, merge_totals,
};
