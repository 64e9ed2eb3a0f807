//! Process-wide map from log identity to its single [`LogIndex`].
//!
//! Each identity gets a slot on first request. Callers racing on an empty slot
//! serialize on that slot's init lock, so exactly one of them touches the disk
//! while requests for other identities proceed independently.
//!
//! Stores sharing a registry count themselves as holders of the indexes they
//! use; an index is only evicted on shutdown once its last holder lets go.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{PatchLogError, StoreResult};
use crate::types::Id;

use super::index::LogIndex;

#[derive(Default)]
struct Slot {
    init: Mutex<()>,
    value: OnceLock<Arc<LogIndex>>,
    // Stores currently holding the index. Guarded by the registry map lock.
    holders: Mutex<usize>,
}

#[derive(Default)]
pub struct IdentityRegistry {
    slots: Mutex<HashMap<Id, Arc<Slot>>>,
    // Shared by lookups that may build an index, exclusive for delete,
    // disable and shutdown.
    lifecycle: RwLock<()>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `id`, running `initializer` if this is the first
    /// request for it. A failed initializer leaves no slot behind so a later
    /// caller can try again.
    pub fn get_or_init<F>(&self, id: Id, initializer: F) -> StoreResult<Arc<LogIndex>>
    where
        F: FnOnce() -> StoreResult<LogIndex>,
    {
        loop {
            let slot = {
                let mut slots = self.slots.lock();
                slots.entry(id).or_default().clone()
            };

            if let Some(index) = slot.value.get() {
                return Ok(index.clone());
            }

            let _init = slot.init.lock();
            if let Some(index) = slot.value.get() {
                return Ok(index.clone());
            }
            // A failed initializer dropped this slot while we waited.
            if !self.is_current(&id, &slot) {
                continue;
            }

            let index = match initializer() {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    let mut slots = self.slots.lock();
                    if slots.get(&id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                        slots.remove(&id);
                    }
                    return Err(e);
                }
            };
            if index.id() != id {
                warn!("Initializer for {} produced index for {}", id, index.id());
            }
            let _ = slot.value.set(index.clone());

            // The entry may have been removed while the initializer ran.
            if !self.is_current(&id, &slot) {
                index.release();
                return Err(PatchLogError::NotFound(format!(
                    "{} was removed during initialization",
                    id
                )));
            }

            debug!("Registered log index for {}", id);
            return Ok(index);
        }
    }

    fn is_current(&self, id: &Id, slot: &Arc<Slot>) -> bool {
        self.slots
            .lock()
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Look up an already initialized index.
    pub fn get(&self, id: &Id) -> Option<Arc<LogIndex>> {
        let slot = self.slots.lock().get(id).cloned()?;
        slot.value.get().cloned()
    }

    /// Evict `id` regardless of holders. The caller is responsible for
    /// releasing the returned index.
    pub fn remove(&self, id: &Id) -> Option<Arc<LogIndex>> {
        let slot = self.slots.lock().remove(id)?;
        let index = slot.value.get().cloned();
        if index.is_some() {
            debug!("Evicted log index for {}", id);
        }
        index
    }

    /// Count one more holder of the initialized index for `id`. False if there
    /// is no such index.
    pub fn hold(&self, id: &Id) -> bool {
        let slots = self.slots.lock();
        match slots.get(id) {
            Some(slot) if slot.value.get().is_some() => {
                *slot.holders.lock() += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop one holder of `id`. When the last holder goes the entry is evicted
    /// and its index returned for the caller to release.
    pub fn unhold(&self, id: &Id) -> Option<Arc<LogIndex>> {
        let mut slots = self.slots.lock();
        let slot = slots.get(id)?.clone();
        {
            let mut holders = slot.holders.lock();
            *holders = holders.saturating_sub(1);
            if *holders > 0 {
                return None;
            }
        }
        slots.remove(id);
        debug!("Last holder let go of {}", id);
        slot.value.get().cloned()
    }

    pub fn holders(&self, id: &Id) -> usize {
        self.slots
            .lock()
            .get(id)
            .map_or(0, |slot| *slot.holders.lock())
    }

    pub(crate) fn shared_lifecycle(&self) -> RwLockReadGuard<'_, ()> {
        self.lifecycle.read()
    }

    pub(crate) fn exclusive_lifecycle(&self) -> RwLockWriteGuard<'_, ()> {
        self.lifecycle.write()
    }

    /// Identities with an initialized index.
    pub fn snapshot(&self) -> Vec<Id> {
        let slots: Vec<(Id, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        slots
            .into_iter()
            .filter(|(_, slot)| slot.value.get().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, initialized or not.
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Release every index and forget all entries.
    pub fn clear(&self) {
        let slots: Vec<Arc<Slot>> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let mut released = 0;
        for slot in slots {
            if let Some(index) = slot.value.get() {
                index.release();
                released += 1;
            }
        }
        info!("Cleared identity registry ({} log indexes released)", released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SegmentStoreOptions;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_options() -> SegmentStoreOptions {
        SegmentStoreOptions {
            sync_on_write: false,
            write_retries: 0,
        }
    }

    fn init_index(id: Id, temp_dir: &TempDir) -> StoreResult<LogIndex> {
        LogIndex::attach_or_create(id, temp_dir.path().join(id.to_string()), "patch", test_options())
    }

    #[test]
    fn test_get_or_init_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let registry = IdentityRegistry::new();
        let id = Id::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .get_or_init(id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                init_index(id, &temp_dir)
            })
            .unwrap();
        let second = registry
            .get_or_init(id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                init_index(id, &temp_dir)
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.snapshot(), vec![id]);
    }

    #[test]
    fn test_concurrent_first_access() {
        let temp_dir = Arc::new(TempDir::new().unwrap());
        let registry = Arc::new(IdentityRegistry::new());
        let id = Id::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (registry, calls, barrier, temp_dir) =
                    (registry.clone(), calls.clone(), barrier.clone(), temp_dir.clone());
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_init(id, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            init_index(id, &temp_dir)
                        })
                        .unwrap()
                })
            })
            .collect();

        let indexes: Vec<Arc<LogIndex>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(indexes.iter().all(|ix| Arc::ptr_eq(ix, &indexes[0])));
    }

    #[test]
    fn test_failed_init_can_retry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = IdentityRegistry::new();
        let id = Id::new();

        let result = registry.get_or_init(id, || {
            Err(PatchLogError::InvalidConfiguration("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(registry.get(&id).is_none());
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.slot_count(), 0);

        registry.get_or_init(id, || init_index(id, &temp_dir)).unwrap();
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn test_failed_init_leaves_no_slots() {
        let registry = IdentityRegistry::new();
        for _ in 0..10 {
            let result = registry.get_or_init(Id::new(), || {
                Err(PatchLogError::InvalidConfiguration("boom".to_string()))
            });
            assert!(result.is_err());
        }
        assert_eq!(registry.slot_count(), 0);
    }

    #[test]
    fn test_waiter_retries_after_failed_init() {
        let temp_dir = Arc::new(TempDir::new().unwrap());
        let registry = Arc::new(IdentityRegistry::new());
        let id = Id::new();
        let started = Arc::new(Barrier::new(2));

        let failing = {
            let (registry, started) = (registry.clone(), started.clone());
            thread::spawn(move || {
                registry.get_or_init(id, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    Err(PatchLogError::InvalidConfiguration("boom".to_string()))
                })
            })
        };

        started.wait();
        let index = registry.get_or_init(id, || init_index(id, &temp_dir)).unwrap();
        assert!(failing.join().unwrap().is_err());
        assert!(Arc::ptr_eq(&index, &registry.get(&id).unwrap()));
        assert_eq!(registry.slot_count(), 1);
    }

    #[test]
    fn test_last_holder_evicts() {
        let temp_dir = TempDir::new().unwrap();
        let registry = IdentityRegistry::new();
        let id = Id::new();
        assert!(!registry.hold(&id));

        let index = registry.get_or_init(id, || init_index(id, &temp_dir)).unwrap();
        assert!(registry.hold(&id));
        assert!(registry.hold(&id));
        assert_eq!(registry.holders(&id), 2);

        assert!(registry.unhold(&id).is_none());
        assert!(registry.get(&id).is_some());

        let evicted = registry.unhold(&id).unwrap();
        assert!(Arc::ptr_eq(&evicted, &index));
        assert!(registry.get(&id).is_none());
        assert!(registry.unhold(&id).is_none());
    }

    #[test]
    fn test_slow_init_does_not_block_other_ids() {
        let temp_dir = Arc::new(TempDir::new().unwrap());
        let registry = Arc::new(IdentityRegistry::new());
        let slow_id = Id::new();
        let fast_id = Id::new();
        let started = Arc::new(Barrier::new(2));

        let slow = {
            let (registry, temp_dir, started) = (registry.clone(), temp_dir.clone(), started.clone());
            thread::spawn(move || {
                registry
                    .get_or_init(slow_id, || {
                        started.wait();
                        thread::sleep(Duration::from_millis(200));
                        init_index(slow_id, &temp_dir)
                    })
                    .unwrap();
            })
        };

        started.wait();
        registry.get_or_init(fast_id, || init_index(fast_id, &temp_dir)).unwrap();
        // The slow slot is still initializing and is not reported yet.
        assert_eq!(registry.snapshot(), vec![fast_id]);

        slow.join().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let registry = IdentityRegistry::new();
        let a = Id::new();
        let b = Id::new();
        registry.get_or_init(a, || init_index(a, &temp_dir)).unwrap();
        let index_b = registry.get_or_init(b, || init_index(b, &temp_dir)).unwrap();

        let removed = registry.remove(&a).unwrap();
        assert_eq!(removed.id(), a);
        assert!(registry.remove(&a).is_none());
        assert_eq!(registry.snapshot(), vec![b]);

        registry.clear();
        assert!(registry.is_empty());
        assert!(index_b.is_released());
    }
}
