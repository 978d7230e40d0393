//! Range-compressed remap table.
//!
//! Bulk whole-store transforms assign target ids in nearly the same order
//! they read source ids, so the mapping is a handful of arithmetic
//! progressions. Storing disjoint runs `(source_start, target_start, len)`
//! instead of individual pairs keeps memory near-constant regardless of
//! entity count; lookup is a binary search over run starts.

use crate::RemapTable;
use graphport_model::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Run {
    source_start: u64,
    target_start: u64,
    len: u64,
}

impl Run {
    fn source_end(&self) -> u64 {
        self.source_start + self.len
    }

    fn contains(&self, source: u64) -> bool {
        source >= self.source_start && source < self.source_end()
    }

    fn target_for(&self, source: u64) -> u64 {
        self.target_start + (source - self.source_start)
    }

    /// Whether `other` starts exactly where `self` ends, at the same offset.
    fn abuts(&self, other: &Run) -> bool {
        self.source_end() == other.source_start
            && self.target_start + self.len == other.target_start
    }
}

/// Remap table storing ordered disjoint runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCompressedRemapTable {
    runs: Vec<Run>,
    len: u64,
}

impl RunCompressedRemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many runs the table currently holds. A monotonic bulk transform
    /// should see this stay at 1 while `len` grows unbounded.
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Bulk-map the contiguous block `[source_start, source_start + len)`
    /// onto `[target_start, ...)`. Inserts a single run when the block is
    /// untouched; falls back to per-key sets when it overlaps existing runs.
    pub fn set_range(&mut self, source_start: EntityId, target_start: EntityId, len: u64) {
        if len == 0 || !source_start.is_valid() {
            return;
        }
        let (s, t) = (source_start.raw(), target_start.raw());
        let idx = self.runs.partition_point(|r| r.source_start <= s);
        let clear_left = idx == 0 || self.runs[idx - 1].source_end() <= s;
        let clear_right = idx == self.runs.len() || self.runs[idx].source_start >= s + len;
        if clear_left && clear_right {
            self.runs.insert(
                idx,
                Run {
                    source_start: s,
                    target_start: t,
                    len,
                },
            );
            self.len += len;
            self.coalesce_around(idx);
        } else {
            for offset in 0..len {
                self.set(EntityId::from_raw(s + offset), EntityId::from_raw(t + offset));
            }
        }
    }

    /// `Ok(index)` of the run containing `source`, else `Err(insertion_point)`.
    fn locate(&self, source: u64) -> Result<usize, usize> {
        let idx = self.runs.partition_point(|r| r.source_start <= source);
        if idx > 0 && self.runs[idx - 1].contains(source) {
            return Ok(idx - 1);
        }
        Err(idx)
    }

    /// Merge `runs[pos]` into adjacent offset-consistent neighbors.
    fn coalesce_around(&mut self, pos: usize) {
        if pos + 1 < self.runs.len() && self.runs[pos].abuts(&self.runs[pos + 1]) {
            self.runs[pos].len += self.runs[pos + 1].len;
            self.runs.remove(pos + 1);
        }
        if pos > 0 && self.runs[pos - 1].abuts(&self.runs[pos]) {
            self.runs[pos - 1].len += self.runs[pos].len;
            self.runs.remove(pos);
        }
    }
}

impl RemapTable for RunCompressedRemapTable {
    fn get(&self, source: EntityId) -> EntityId {
        if !source.is_valid() {
            return EntityId::INVALID;
        }
        match self.locate(source.raw()) {
            Ok(i) => EntityId::from_raw(self.runs[i].target_for(source.raw())),
            Err(_) => EntityId::INVALID,
        }
    }

    fn set(&mut self, source: EntityId, target: EntityId) {
        if !source.is_valid() {
            return;
        }
        let (s, t) = (source.raw(), target.raw());

        match self.locate(s) {
            Ok(i) => {
                let run = self.runs[i];
                if run.target_for(s) == t {
                    return; // already mapped identically
                }
                // Overwrite inside a run: split into prefix / single / suffix.
                let prefix_len = s - run.source_start;
                let suffix_len = run.source_end() - s - 1;
                let mut replacement = Vec::with_capacity(3);
                if prefix_len > 0 {
                    replacement.push(Run {
                        source_start: run.source_start,
                        target_start: run.target_start,
                        len: prefix_len,
                    });
                }
                replacement.push(Run {
                    source_start: s,
                    target_start: t,
                    len: 1,
                });
                if suffix_len > 0 {
                    replacement.push(Run {
                        source_start: s + 1,
                        target_start: run.target_start + prefix_len + 1,
                        len: suffix_len,
                    });
                }
                let single_pos = i + usize::from(prefix_len > 0);
                self.runs.splice(i..=i, replacement);
                self.coalesce_around(single_pos);
            }
            Err(idx) => {
                let extends_left = idx > 0 && {
                    let r = &self.runs[idx - 1];
                    r.source_end() == s && r.target_start + r.len == t
                };
                let extends_right = idx < self.runs.len() && {
                    let r = &self.runs[idx];
                    r.source_start == s + 1 && r.target_start == t + 1
                };
                match (extends_left, extends_right) {
                    (true, true) => {
                        // the new key bridges two runs into one
                        let right_len = self.runs[idx].len;
                        self.runs[idx - 1].len += 1 + right_len;
                        self.runs.remove(idx);
                    }
                    (true, false) => self.runs[idx - 1].len += 1,
                    (false, true) => {
                        let r = &mut self.runs[idx];
                        r.source_start -= 1;
                        r.target_start = t;
                        r.len += 1;
                    }
                    (false, false) => self.runs.insert(
                        idx,
                        Run {
                            source_start: s,
                            target_start: t,
                            len: 1,
                        },
                    ),
                }
                self.len += 1;
            }
        }
    }

    fn remove(&mut self, source: EntityId) {
        let Ok(i) = self.locate(source.raw()) else {
            return;
        };
        let run = self.runs[i];
        let s = source.raw();
        let prefix_len = s - run.source_start;
        let suffix_len = run.source_end() - s - 1;
        let mut replacement = Vec::with_capacity(2);
        if prefix_len > 0 {
            replacement.push(Run {
                source_start: run.source_start,
                target_start: run.target_start,
                len: prefix_len,
            });
        }
        if suffix_len > 0 {
            replacement.push(Run {
                source_start: s + 1,
                target_start: run.target_start + prefix_len + 1,
                len: suffix_len,
            });
        }
        self.runs.splice(i..=i, replacement);
        self.len -= 1;
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn for_each(&self, f: &mut dyn FnMut(EntityId, EntityId)) {
        for run in &self.runs {
            for offset in 0..run.len {
                f(
                    EntityId::from_raw(run.source_start + offset),
                    EntityId::from_raw(run.target_start + offset),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn monotonic_bulk_insert_stays_one_run() {
        let mut table = RunCompressedRemapTable::new();
        for i in 1..=10_000u64 {
            table.set(id(i), id(i + 1000));
        }
        assert_eq!(table.run_count(), 1);
        assert_eq!(table.len(), 10_000);
        assert_eq!(table.get(id(5000)), id(6000));
        assert_eq!(table.get(id(20_000)), EntityId::INVALID);
    }

    #[test]
    fn overwrite_splits_the_run() {
        let mut table = RunCompressedRemapTable::new();
        for i in 1..=10u64 {
            table.set(id(i), id(i + 100));
        }
        assert_eq!(table.run_count(), 1);

        table.set(id(5), id(9999));
        assert_eq!(table.get(id(5)), id(9999));
        assert_eq!(table.get(id(4)), id(104));
        assert_eq!(table.get(id(6)), id(106));
        assert_eq!(table.len(), 10);
        assert_eq!(table.run_count(), 3);
    }

    #[test]
    fn bridging_key_merges_two_runs() {
        let mut table = RunCompressedRemapTable::new();
        table.set(id(1), id(11));
        table.set(id(2), id(12));
        table.set(id(4), id(14));
        table.set(id(5), id(15));
        assert_eq!(table.run_count(), 2);

        table.set(id(3), id(13));
        assert_eq!(table.run_count(), 1);
        assert_eq!(table.len(), 5);
        assert_eq!(table.get(id(3)), id(13));
    }

    #[test]
    fn remove_splits_and_decrements() {
        let mut table = RunCompressedRemapTable::new();
        for i in 1..=5u64 {
            table.set(id(i), id(i + 10));
        }
        table.remove(id(3));
        assert_eq!(table.get(id(3)), EntityId::INVALID);
        assert_eq!(table.get(id(2)), id(12));
        assert_eq!(table.get(id(4)), id(14));
        assert_eq!(table.len(), 4);
        assert_eq!(table.run_count(), 2);

        table.remove(id(99)); // absent key: no-op
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn set_range_is_one_run() {
        let mut table = RunCompressedRemapTable::new();
        table.set_range(id(0x100), id(0x500), 64);
        assert_eq!(table.run_count(), 1);
        assert_eq!(table.get(id(0x120)), id(0x520));
    }

    proptest! {
        /// The compressed table must agree with a plain map under any
        /// interleaving of sets, overwrites, and removes.
        #[test]
        fn agrees_with_model_map(ops in proptest::collection::vec((1u64..64, 1u64..256, prop::bool::ANY), 0..200)) {
            let mut table = RunCompressedRemapTable::new();
            let mut model: BTreeMap<u64, u64> = BTreeMap::new();

            for (source, target, is_remove) in ops {
                if is_remove {
                    table.remove(id(source));
                    model.remove(&source);
                } else {
                    table.set(id(source), id(target));
                    model.insert(source, target);
                }
            }

            prop_assert_eq!(table.len(), model.len() as u64);
            for key in 1u64..64 {
                let expected = model.get(&key).copied().map(id).unwrap_or(EntityId::INVALID);
                prop_assert_eq!(table.get(id(key)), expected);
            }
        }
    }
}
