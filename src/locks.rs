// Lock Registry - per-entity locks serializing read-modify-write sequences
//
// Locks are created on first use. Looking up or creating a slot happens under
// one short registry guard; blocking on the entity lock happens after that
// guard is released. Every caller takes the primary-id lock before the
// merged-id lock, so two rows can never wait on each other in a cycle.

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type KeyLock = Arc<Mutex<()>>;

#[derive(Default)]
struct LockMaps {
    by_primary: HashMap<String, KeyLock>,
    by_merged: HashMap<String, KeyLock>,
}

#[derive(Clone, Copy)]
enum KeySpace {
    Primary,
    Merged,
}

#[derive(Default)]
pub struct LockRegistry {
    maps: Mutex<LockMaps>,
}

/// Both entity locks of one row. Field order makes the merged-id guard drop
/// first, then the primary-id guard.
pub struct ScopedLock {
    _merged: ArcMutexGuard<RawMutex, ()>,
    _primary: ArcMutexGuard<RawMutex, ()>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until this caller holds the locks for `primary` and `merged`.
    pub fn acquire(&self, primary: &str, merged: &str) -> ScopedLock {
        let primary_guard = self.slot(KeySpace::Primary, primary).lock_arc();
        let merged_guard = self.slot(KeySpace::Merged, merged).lock_arc();
        ScopedLock {
            _merged: merged_guard,
            _primary: primary_guard,
        }
    }

    /// Lock object for a key, registered on first use.
    fn slot(&self, space: KeySpace, key: &str) -> KeyLock {
        let mut maps = self.maps.lock();
        let map = match space {
            KeySpace::Primary => &mut maps.by_primary,
            KeySpace::Merged => &mut maps.by_merged,
        };
        match map.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                match space {
                    KeySpace::Primary => debug!("Duplicate id {} in input", key),
                    KeySpace::Merged => debug!("Duplicate merged id {} in input", key),
                }
                Arc::clone(slot.get())
            }
            Entry::Vacant(slot) => Arc::clone(slot.insert(KeyLock::default())),
        }
    }

    /// Forget every registered key. Only call when no row is in flight.
    pub fn reset(&self) {
        let mut maps = self.maps.lock();
        maps.by_primary.clear();
        maps.by_merged.clear();
    }

    /// Number of registered keys (primary, merged).
    pub fn len(&self) -> (usize, usize) {
        let maps = self.maps.lock();
        (maps.by_primary.len(), maps.by_merged.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
