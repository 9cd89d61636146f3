//! An indexed binary min-heap with decrease-key and search history.
//!
//! Elements are external ids with a key and a payload.
//! The heap keeps a record of every id inserted since the last `clear`, even after it was popped.
//! Keys and payloads of settled ids stay addressable, which is what searches need to reconstruct paths through parent pointers.
//! How ids are mapped to their record is decided by an `IndexStorage` policy:
//! `ArrayStorage` for dense id spaces and `MapStorage` for sparse ones.
//!
//! # Examples
//!
//! ```
//! use compressed_ch::datastr::index_heap::{ArrayStorage, IndexedBinaryHeap};
//!
//! let mut heap: IndexedBinaryHeap<u32, u32, ArrayStorage> = IndexedBinaryHeap::new(3);
//! heap.insert(0, 42, 0);
//! heap.insert(1, 23, 1);
//! heap.insert(2, 50000, 2);
//! assert_eq!(heap.min(), Some(1));
//! heap.decrease_key(0, 1);
//! assert_eq!(heap.delete_min(), Some(0));
//! assert!(heap.was_removed(0));
//! assert_eq!(heap.key(0), 1);
//! ```

use crate::datastr::graph::NodeId;
use rustc_hash::FxHashMap;

/// Maps external ids to slots in the heap's record of inserted elements.
pub trait IndexStorage {
    /// Create storage for ids in `[0, max_id)`. Sparse storages may ignore the bound.
    fn with_max_id(max_id: usize) -> Self;
    /// The slot last assigned to `id`. May be stale, the heap validates it.
    fn get(&self, id: NodeId) -> Option<usize>;
    fn set(&mut self, id: NodeId, slot: usize);
    fn clear(&mut self);
}

/// Dense index storage, a plain array over all ids.
/// Clearing is O(1), stale slots are detected by the heap.
#[derive(Debug, Clone)]
pub struct ArrayStorage {
    slots: Vec<usize>,
}

const INVALID_SLOT: usize = usize::MAX;

impl IndexStorage for ArrayStorage {
    fn with_max_id(max_id: usize) -> Self {
        ArrayStorage {
            slots: vec![INVALID_SLOT; max_id],
        }
    }

    #[inline]
    fn get(&self, id: NodeId) -> Option<usize> {
        match self.slots[id as usize] {
            INVALID_SLOT => None,
            slot => Some(slot),
        }
    }

    #[inline]
    fn set(&mut self, id: NodeId, slot: usize) {
        self.slots[id as usize] = slot;
    }

    fn clear(&mut self) {}
}

/// Sparse index storage backed by a hash map.
#[derive(Debug, Clone, Default)]
pub struct MapStorage {
    slots: FxHashMap<NodeId, usize>,
}

impl IndexStorage for MapStorage {
    fn with_max_id(_max_id: usize) -> Self {
        Self::default()
    }

    #[inline]
    fn get(&self, id: NodeId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    #[inline]
    fn set(&mut self, id: NodeId, slot: usize) {
        self.slots.insert(id, slot);
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

#[derive(Debug, Clone)]
struct InsertedElement<K, D> {
    id: NodeId,
    // position in `heap` or `REMOVED`
    position: usize,
    key: K,
    data: D,
}

const REMOVED: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct HeapElement<K> {
    slot: usize,
    key: K,
}

/// A binary min-heap over ids with keys `K` and payloads `D`.
#[derive(Debug, Clone)]
pub struct IndexedBinaryHeap<K, D, S = ArrayStorage> {
    inserted: Vec<InsertedElement<K, D>>,
    heap: Vec<HeapElement<K>>,
    index: S,
}

impl<K: Ord + Copy, D, S: IndexStorage> IndexedBinaryHeap<K, D, S> {
    /// Creates an empty heap for ids in `[0, max_id)`.
    pub fn new(max_id: usize) -> Self {
        IndexedBinaryHeap {
            inserted: Vec::new(),
            heap: Vec::new(),
            index: S::with_max_id(max_id),
        }
    }

    /// Number of elements currently in the heap.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Forget everything, including the history of removed elements.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.inserted.clear();
        self.index.clear();
    }

    #[inline]
    fn slot(&self, id: NodeId) -> Option<usize> {
        self.index
            .get(id)
            .filter(|&slot| slot < self.inserted.len() && self.inserted[slot].id == id)
    }

    #[inline]
    fn known_slot(&self, id: NodeId) -> usize {
        self.slot(id).unwrap_or_else(|| panic!("id {} was never inserted", id))
    }

    pub fn was_inserted(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn was_removed(&self, id: NodeId) -> bool {
        self.slot(id).map(|slot| self.inserted[slot].position == REMOVED).unwrap_or(false)
    }

    /// Is `id` currently in the heap?
    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).map(|slot| self.inserted[slot].position != REMOVED).unwrap_or(false)
    }

    /// Current key of an inserted id, or the key it had when it was removed.
    /// Panics if `id` was never inserted.
    pub fn key(&self, id: NodeId) -> K {
        self.inserted[self.known_slot(id)].key
    }

    pub fn data(&self, id: NodeId) -> &D {
        &self.inserted[self.known_slot(id)].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut D {
        let slot = self.known_slot(id);
        &mut self.inserted[slot].data
    }

    /// Id with the smallest key without removing it.
    pub fn min(&self) -> Option<NodeId> {
        self.heap.first().map(|element| self.inserted[element.slot].id)
    }

    pub fn min_key(&self) -> Option<K> {
        self.heap.first().map(|element| element.key)
    }

    /// Insert an id which was not inserted since the last `clear`.
    pub fn insert(&mut self, id: NodeId, key: K, data: D) {
        debug_assert!(!self.was_inserted(id), "id {} inserted twice", id);
        let slot = self.inserted.len();
        let position = self.heap.len();
        self.inserted.push(InsertedElement { id, position, key, data });
        self.heap.push(HeapElement { slot, key });
        self.index.set(id, slot);
        self.sift_up(position);
    }

    /// Lower the key of an inserted id. `key` must not be larger than the current key.
    /// For an id which was already removed only the recorded key is updated.
    pub fn decrease_key(&mut self, id: NodeId, key: K) {
        let slot = self.known_slot(id);
        debug_assert!(key <= self.inserted[slot].key, "decrease_key must not increase keys");
        self.inserted[slot].key = key;
        let position = self.inserted[slot].position;
        if position != REMOVED {
            self.heap[position].key = key;
            self.sift_up(position);
        }
    }

    /// Remove the id with the smallest key. It stays addressable until `clear`.
    pub fn delete_min(&mut self) -> Option<NodeId> {
        if self.heap.is_empty() {
            return None;
        }
        let root = self.heap.swap_remove(0);
        self.inserted[root.slot].position = REMOVED;
        if !self.heap.is_empty() {
            self.inserted[self.heap[0].slot].position = 0;
            self.sift_down(0);
        }
        Some(self.inserted[root.slot].id)
    }

    fn sift_up(&mut self, mut position: usize) {
        let element = self.heap[position];
        while position > 0 {
            let parent = (position - 1) / 2;
            if self.heap[parent].key <= element.key {
                break;
            }
            self.heap[position] = self.heap[parent];
            self.inserted[self.heap[position].slot].position = position;
            position = parent;
        }
        self.heap[position] = element;
        self.inserted[element.slot].position = position;
    }

    fn sift_down(&mut self, mut position: usize) {
        let element = self.heap[position];
        loop {
            let left = 2 * position + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let child = if right < self.heap.len() && self.heap[right].key < self.heap[left].key {
                right
            } else {
                left
            };
            if element.key <= self.heap[child].key {
                break;
            }
            self.heap[position] = self.heap[child];
            self.inserted[self.heap[position].slot].position = position;
            position = child;
        }
        self.heap[position] = element;
        self.inserted[element.slot].position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pop_all<S: IndexStorage>(heap: &mut IndexedBinaryHeap<u32, (), S>) -> Vec<(NodeId, u32)> {
        let mut popped = Vec::new();
        while let Some(id) = heap.delete_min() {
            popped.push((id, heap.key(id)));
        }
        popped
    }

    #[test]
    fn pops_in_key_order() {
        let mut heap = IndexedBinaryHeap::<u32, (), ArrayStorage>::new(10);
        for (id, key) in [(3, 30), (1, 10), (7, 70), (5, 5), (9, 90)] {
            heap.insert(id, key, ());
        }
        heap.decrease_key(9, 1);
        assert_eq!(pop_all(&mut heap), vec![(9, 1), (5, 5), (1, 10), (3, 30), (7, 70)]);
    }

    #[test]
    fn history_survives_until_clear() {
        let mut heap = IndexedBinaryHeap::<u32, &str, MapStorage>::new(0);
        heap.insert(1_000_000, 4, "far");
        heap.insert(17, 2, "near");
        assert_eq!(heap.delete_min(), Some(17));
        assert!(heap.was_removed(17));
        assert!(!heap.was_removed(1_000_000));
        assert_eq!(*heap.data(17), "near");

        assert_eq!(heap.delete_min(), Some(1_000_000));
        assert!(heap.is_empty());
        assert!(heap.was_removed(1_000_000));
        assert_eq!(heap.key(1_000_000), 4);

        heap.clear();
        assert!(!heap.was_inserted(17));
        assert!(!heap.was_removed(17));
    }

    #[test]
    fn array_storage_ignores_stale_slots_after_clear() {
        let mut heap = IndexedBinaryHeap::<u32, (), ArrayStorage>::new(4);
        heap.insert(3, 1, ());
        heap.insert(2, 1, ());
        heap.clear();
        heap.insert(2, 5, ());
        assert!(!heap.was_inserted(3));
        assert!(heap.was_inserted(2));
        assert_eq!(heap.key(2), 5);
    }

    #[test]
    fn decrease_key_of_removed_only_updates_record() {
        let mut heap = IndexedBinaryHeap::<u32, (), ArrayStorage>::new(3);
        heap.insert(0, 3, ());
        heap.insert(1, 8, ());
        assert_eq!(heap.delete_min(), Some(0));
        heap.decrease_key(0, 1);
        assert_eq!(heap.key(0), 1);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.min(), Some(1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(NodeId, u32),
        Decrease(NodeId, u32),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..64u32, 0..1000u32).prop_map(|(id, key)| Op::Insert(id, key)),
            (0..64u32, 0..1000u32).prop_map(|(id, delta)| Op::Decrease(id, delta)),
            Just(Op::Pop),
        ]
    }

    fn run_ops<S: IndexStorage>(ops: &[Op]) -> std::result::Result<(), TestCaseError> {
        let mut heap = IndexedBinaryHeap::<u32, u32, S>::new(64);
        let mut last_popped = 0;
        let mut popped = Vec::new();

        for op in ops {
            match *op {
                Op::Insert(id, key) => {
                    if !heap.was_inserted(id) {
                        heap.insert(id, key.max(last_popped), id);
                    }
                }
                Op::Decrease(id, delta) => {
                    if heap.contains(id) {
                        let before = heap.key(id);
                        let key = before.saturating_sub(delta).max(last_popped);
                        heap.decrease_key(id, key);
                        prop_assert!(heap.key(id) <= before);
                    }
                }
                Op::Pop => {
                    if let Some(id) = heap.delete_min() {
                        prop_assert!(heap.key(id) >= last_popped);
                        prop_assert_eq!(*heap.data(id), id);
                        last_popped = heap.key(id);
                        popped.push(id);
                    }
                }
            }
            for &id in &popped {
                prop_assert!(heap.was_removed(id));
            }
        }

        while let Some(id) = heap.delete_min() {
            prop_assert!(heap.key(id) >= last_popped);
            last_popped = heap.key(id);
        }
        heap.clear();
        for &id in &popped {
            prop_assert!(!heap.was_removed(id));
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn keys_pop_monotone_with_array_storage(ops in prop::collection::vec(op(), 0..200)) {
            run_ops::<ArrayStorage>(&ops)?;
        }

        #[test]
        fn keys_pop_monotone_with_map_storage(ops in prop::collection::vec(op(), 0..200)) {
            run_ops::<MapStorage>(&ops)?;
        }
    }
}
