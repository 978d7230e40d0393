//! Sharded hash-map remap table.
//!
//! Native map containers cap out far below the id counts a whole-store
//! incremental transform can see. The table buckets keys into fixed-capacity
//! sub-maps created lazily; shard choice is a pure function of the key, so a
//! lookup touches exactly one shard.

use crate::RemapTable;
use ahash::AHashMap;
use graphport_model::EntityId;
use serde::{Deserialize, Serialize};

/// Sharding policy: capacity per shard and the shard-selection function.
/// An implementation detail of the table, not part of the remap contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPolicy {
    pub capacity_per_shard: u64,
}

impl ShardPolicy {
    /// Keeps every shard safely under the host container ceiling.
    pub const DEFAULT_CAPACITY: u64 = 10_000_000;

    pub fn new(capacity_per_shard: u64) -> Self {
        assert!(capacity_per_shard > 0, "shard capacity must be nonzero");
        Self { capacity_per_shard }
    }

    /// Which shard holds `key`. Keys in `[i*cap, (i+1)*cap)` share shard
    /// `i`, so a shard can never exceed `capacity_per_shard` entries.
    pub fn shard_of(&self, key: EntityId) -> u64 {
        key.raw() / self.capacity_per_shard
    }
}

impl Default for ShardPolicy {
    fn default() -> Self {
        Self {
            capacity_per_shard: Self::DEFAULT_CAPACITY,
        }
    }
}

/// Remap table backed by lazily created fixed-capacity shards.
#[derive(Debug, Default)]
pub struct ShardedRemapTable {
    policy: ShardPolicy,
    shards: AHashMap<u64, AHashMap<u64, u64>>,
    /// Tracked incrementally; never recomputed by scanning shards.
    len: u64,
}

impl ShardedRemapTable {
    pub fn new(policy: ShardPolicy) -> Self {
        Self {
            policy,
            shards: AHashMap::new(),
            len: 0,
        }
    }

    pub fn policy(&self) -> ShardPolicy {
        self.policy
    }

    /// Number of shards materialized so far.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl RemapTable for ShardedRemapTable {
    fn get(&self, source: EntityId) -> EntityId {
        if !source.is_valid() {
            return EntityId::INVALID;
        }
        self.shards
            .get(&self.policy.shard_of(source))
            .and_then(|shard| shard.get(&source.raw()))
            .map(|&raw| EntityId::from_raw(raw))
            .unwrap_or(EntityId::INVALID)
    }

    fn set(&mut self, source: EntityId, target: EntityId) {
        if !source.is_valid() {
            return;
        }
        let shard = self
            .shards
            .entry(self.policy.shard_of(source))
            .or_default();
        if shard.insert(source.raw(), target.raw()).is_none() {
            self.len += 1;
        }
    }

    fn remove(&mut self, source: EntityId) {
        if let Some(shard) = self.shards.get_mut(&self.policy.shard_of(source)) {
            if shard.remove(&source.raw()).is_some() {
                self.len -= 1;
            }
        }
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn for_each(&self, f: &mut dyn FnMut(EntityId, EntityId)) {
        for shard in self.shards.values() {
            for (&source, &target) in shard {
                f(EntityId::from_raw(source), EntityId::from_raw(target));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn size_is_exact_across_shard_boundaries() {
        // Small capacity so the test spans many shards the way a
        // whole-store run spans the real 10M ceiling.
        let mut table = ShardedRemapTable::new(ShardPolicy::new(1_000));
        let n = 25_000u64;

        for i in 1..=n {
            table.set(id(i), id(i + 7));
        }
        assert_eq!(table.len(), n);
        assert!(table.shard_count() > 1);

        // deleting half decrements by exactly that half
        for i in 1..=(n / 2) {
            table.remove(id(i));
        }
        assert_eq!(table.len(), n / 2);

        // re-setting an existing key leaves size unchanged
        table.set(id(n), id(99));
        assert_eq!(table.len(), n / 2);
        assert_eq!(table.get(id(n)), id(99));
    }

    #[test]
    fn unmapped_and_invalid_lookups_return_sentinel() {
        let mut table = ShardedRemapTable::default();
        assert_eq!(table.get(id(42)), EntityId::INVALID);
        assert_eq!(table.get(EntityId::INVALID), EntityId::INVALID);
        // mapping the sentinel itself is a no-op
        table.set(EntityId::INVALID, id(1));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn removing_absent_key_is_harmless() {
        let mut table = ShardedRemapTable::default();
        table.set(id(5), id(6));
        table.remove(id(123456));
        assert_eq!(table.len(), 1);
    }
}
