//! Deferred target ids.
//!
//! Visitation order can reach a child before the parent that will own its
//! target id exists, so a remap entry may be a promise rather than a value.
//! `DeferredId` is that promise made explicit: writers resolve it exactly
//! once, readers either poll or block until resolution.

use graphport_model::EntityId;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Resolving a deferred id twice with different values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("deferred id already resolved to {existing}, cannot re-resolve to {attempted}")]
pub struct DeferredIdConflict {
    pub existing: EntityId,
    pub attempted: EntityId,
}

#[derive(Default)]
struct Slot {
    value: Mutex<Option<EntityId>>,
    ready: Condvar,
}

/// A target id that may not exist yet. Clones share the same slot.
#[derive(Clone, Default)]
pub struct DeferredId {
    slot: Arc<Slot>,
}

impl DeferredId {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn resolved(id: EntityId) -> Self {
        let deferred = Self::pending();
        let _ = deferred.resolve(id);
        deferred
    }

    /// Resolve the promise. Idempotent for the same id; resolving to a
    /// different id is a conflict.
    pub fn resolve(&self, id: EntityId) -> Result<(), DeferredIdConflict> {
        let mut value = self.slot.value.lock();
        match *value {
            None => {
                *value = Some(id);
                self.slot.ready.notify_all();
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(DeferredIdConflict {
                existing,
                attempted: id,
            }),
        }
    }

    /// The resolved id, if resolution has happened.
    pub fn try_get(&self) -> Option<EntityId> {
        *self.slot.value.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }

    /// Block until resolved. Only meaningful when another thread holds the
    /// writer side; a single-threaded session must resolve before reading.
    pub fn wait(&self) -> EntityId {
        let mut value = self.slot.value.lock();
        loop {
            if let Some(id) = *value {
                return id;
            }
            self.slot.ready.wait(&mut value);
        }
    }
}

impl std::fmt::Debug for DeferredId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_get() {
            Some(id) => write!(f, "DeferredId(resolved {id})"),
            None => write!(f, "DeferredId(pending)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_then_read() {
        let d = DeferredId::pending();
        assert!(!d.is_resolved());
        assert_eq!(d.try_get(), None);

        d.resolve(EntityId::from_raw(0x42)).unwrap();
        assert_eq!(d.try_get(), Some(EntityId::from_raw(0x42)));
        assert_eq!(d.wait(), EntityId::from_raw(0x42));
    }

    #[test]
    fn re_resolve_same_is_idempotent_different_is_conflict() {
        let d = DeferredId::resolved(EntityId::from_raw(7));
        assert!(d.resolve(EntityId::from_raw(7)).is_ok());

        let err = d.resolve(EntityId::from_raw(8)).unwrap_err();
        assert_eq!(err.existing, EntityId::from_raw(7));
        assert_eq!(err.attempted, EntityId::from_raw(8));
    }

    #[test]
    fn clones_share_resolution() {
        let d = DeferredId::pending();
        let other = d.clone();
        d.resolve(EntityId::from_raw(3)).unwrap();
        assert_eq!(other.try_get(), Some(EntityId::from_raw(3)));
    }

    #[test]
    fn wait_unblocks_across_threads() {
        let d = DeferredId::pending();
        let writer = d.clone();
        let handle = std::thread::spawn(move || {
            writer.resolve(EntityId::from_raw(9)).unwrap();
        });
        assert_eq!(d.wait(), EntityId::from_raw(9));
        handle.join().unwrap();
    }
}
