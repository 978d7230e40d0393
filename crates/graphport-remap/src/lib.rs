//! Source-id → target-id remap tables.
//!
//! Two interchangeable backings satisfy one contract:
//!
//! - [`ShardedRemapTable`]: bucketed hash maps for incremental transforms
//!   whose key space exceeds what a single container should hold.
//! - [`RunCompressedRemapTable`]: ordered disjoint runs for bulk transforms
//!   whose mappings are overwhelmingly monotonic — near-constant memory no
//!   matter how many entities are provisioned.
//!
//! Both overwrite on re-map (a table is a partial function, not a log) and
//! answer unmapped lookups with the invalid sentinel, never an error.

pub mod deferred;
pub mod runs;
pub mod sharded;

pub use deferred::{DeferredId, DeferredIdConflict};
pub use runs::RunCompressedRemapTable;
pub use sharded::{ShardPolicy, ShardedRemapTable};

use graphport_model::EntityId;

/// The remap-table contract shared by both backings.
pub trait RemapTable: Send {
    /// Target id for `source`, or [`EntityId::INVALID`] when unmapped.
    fn get(&self, source: EntityId) -> EntityId;

    /// Map `source` to `target`, overwriting any previous mapping.
    fn set(&mut self, source: EntityId, target: EntityId);

    /// Retract the mapping for `source`, if any.
    fn remove(&mut self, source: EntityId);

    /// Number of mapped source ids.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every `(source, target)` pair. Order is unspecified.
    fn for_each(&self, f: &mut dyn FnMut(EntityId, EntityId));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(table: &mut dyn RemapTable) {
        let a = EntityId::from_raw(10);
        let b = EntityId::from_raw(900);

        assert_eq!(table.get(a), EntityId::INVALID);

        table.set(a, b);
        assert_eq!(table.get(a), b);
        // idempotent re-query
        assert_eq!(table.get(a), b);
        assert_eq!(table.len(), 1);

        // overwrite, not append
        let c = EntityId::from_raw(901);
        table.set(a, c);
        assert_eq!(table.get(a), c);
        assert_eq!(table.len(), 1);

        table.remove(a);
        assert_eq!(table.get(a), EntityId::INVALID);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn both_backings_honor_the_contract() {
        contract(&mut ShardedRemapTable::default());
        contract(&mut RunCompressedRemapTable::new());
    }
}
