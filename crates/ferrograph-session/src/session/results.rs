//! Results store: computed values keyed by [`VarId`].
//!
//! Each entry counts the consumers that still have to read it. When the
//! count reaches zero the array is handed back to the memory manager, unless
//! the entry is pinned (requested outputs and loop invariants, which every
//! iteration reads).
//!
//! A value is produced at most once per `VarId`. Released ids are remembered
//! so a second production is caught even after the first value is gone.

use std::collections::{HashMap, HashSet};

use ferrograph_core::array::Array;
use ferrograph_core::frame::VarId;
use ferrograph_core::memory::MemoryManager;

use super::error::ExecError;

#[derive(Debug)]
struct Entry {
    array: Array,
    remaining: usize,
    pinned: bool,
}

#[derive(Debug, Default)]
pub struct ResultsStore {
    entries: HashMap<VarId, Entry>,
    released: HashSet<VarId>,
}

impl ResultsStore {
    pub fn new() -> Self {
        ResultsStore::default()
    }

    /// Stores the value produced for `id` by `instance`.
    pub fn insert(
        &mut self,
        instance: &str,
        id: VarId,
        array: Array,
        consumers: usize,
        pinned: bool,
    ) -> Result<(), ExecError> {
        if self.entries.contains_key(&id) || self.released.contains(&id) {
            return Err(ExecError::InvariantViolation {
                instance: instance.to_string(),
                reason: format!("{} was already produced", id),
            });
        }
        self.entries.insert(
            id,
            Entry {
                array,
                remaining: consumers,
                pinned,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &VarId) -> Option<&Array> {
        self.entries.get(id).map(|e| &e.array)
    }

    pub fn contains(&self, id: &VarId) -> bool {
        self.entries.contains_key(id)
    }

    /// Records one read of `id`. Returns `true` if the value was released.
    pub fn consume(&mut self, id: &VarId, memory: &dyn MemoryManager) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.pinned {
            return false;
        }
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining > 0 {
            return false;
        }
        if let Some(entry) = self.entries.remove(id) {
            tracing::trace!("releasing {}", id);
            memory.release(entry.array);
        }
        self.released.insert(id.clone());
        true
    }

    /// Removes and returns the value of `id`.
    pub fn take(&mut self, id: &VarId) -> Option<Array> {
        let entry = self.entries.remove(id)?;
        self.released.insert(id.clone());
        Some(entry.array)
    }

    /// Releases every remaining value, pinned or not.
    pub fn release_all(&mut self, memory: &dyn MemoryManager) {
        for (id, entry) in self.entries.drain() {
            self.released.insert(id);
            memory.release(entry.array);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrograph_core::frame::FrameIter;
    use ferrograph_core::memory::DetachedMemoryManager;

    #[test]
    fn values_are_released_after_last_consumer() {
        let memory = DetachedMemoryManager;
        let mut store = ResultsStore::new();
        let id = VarId::outer("t");
        store
            .insert("op@main:0", id.clone(), Array::scalar_i32(1), 2, false)
            .unwrap();

        assert!(!store.consume(&id, &memory));
        assert!(store.contains(&id));
        assert!(store.consume(&id, &memory));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn pinned_values_survive_consumption() {
        let memory = DetachedMemoryManager;
        let mut store = ResultsStore::new();
        let id = VarId::new("limit", FrameIter::outer().enter("while"));
        store
            .insert("enter@main:0", id.clone(), Array::scalar_i32(3), 1, true)
            .unwrap();
        for _ in 0..5 {
            assert!(!store.consume(&id, &memory));
        }
        assert_eq!(store.take(&id), Some(Array::scalar_i32(3)));
        assert!(store.is_empty());
    }

    #[test]
    fn second_production_is_an_invariant_violation() {
        let memory = DetachedMemoryManager;
        let mut store = ResultsStore::new();
        let id = VarId::outer("t");
        store
            .insert("a@main:0", id.clone(), Array::scalar_i32(1), 1, false)
            .unwrap();
        store.consume(&id, &memory);

        let err = store
            .insert("b@main:0", id, Array::scalar_i32(2), 1, false)
            .unwrap_err();
        assert!(matches!(err, ExecError::InvariantViolation { ref instance, .. } if instance == "b@main:0"));
    }

    #[test]
    fn release_all_empties_the_store() {
        let memory = DetachedMemoryManager;
        let mut store = ResultsStore::new();
        store
            .insert("a@main:0", VarId::outer("a"), Array::scalar_i32(1), 1, true)
            .unwrap();
        store
            .insert("b@main:0", VarId::outer("b"), Array::scalar_i32(2), 3, false)
            .unwrap();
        assert_eq!(store.len(), 2);
        store.release_all(&memory);
        assert!(store.is_empty());
    }
}
