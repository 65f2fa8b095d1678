//! Deadline min-heap with entry back-references

use std::collections::HashMap;
use std::time::Instant;

use crate::store::Entry;
use crate::value::Value;

/// Min-heap of keys ordered by their entries' deadlines. Every node's array
/// position is mirrored into the owning entry (`heap_pos`), which is what
/// makes `fix` and `remove` O(log n). The keyspace map is threaded through
/// each operation because the deadlines and positions live in the entries.
///
/// Invariants held after every call: a key is in the heap iff its entry has
/// a deadline, and `entry.heap_pos == Some(i)` iff `keys[i]` is that key.
#[derive(Debug, Default)]
pub struct TtlHeap {
    keys: Vec<Value>,
}

impl TtlHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn deadline(&self, map: &HashMap<Value, Entry>, i: usize) -> Instant {
        // every heap node's entry carries a deadline; a missing one means
        // the membership invariant was already broken
        map.get(&self.keys[i])
            .and_then(|e| e.deadline)
            .unwrap_or_else(Instant::now)
    }

    fn set_pos(&self, map: &mut HashMap<Value, Entry>, i: usize) {
        if let Some(entry) = map.get_mut(&self.keys[i]) {
            entry.heap_pos = Some(i);
        }
    }

    fn swap(&mut self, map: &mut HashMap<Value, Entry>, i: usize, j: usize) {
        self.keys.swap(i, j);
        self.set_pos(map, i);
        self.set_pos(map, j);
    }

    fn sift_up(&mut self, map: &mut HashMap<Value, Entry>, mut i: usize) -> usize {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.deadline(map, i) >= self.deadline(map, parent) {
                break;
            }
            self.swap(map, i, parent);
            i = parent;
        }
        i
    }

    fn sift_down(&mut self, map: &mut HashMap<Value, Entry>, mut i: usize) -> usize {
        let len = self.keys.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < len && self.deadline(map, right) < self.deadline(map, left) {
                child = right;
            }
            if self.deadline(map, child) >= self.deadline(map, i) {
                break;
            }
            self.swap(map, i, child);
            i = child;
        }
        i
    }

    /// Inserts a key whose entry already carries a deadline and records the
    /// node's position into the entry.
    pub fn push(&mut self, map: &mut HashMap<Value, Entry>, key: Value) {
        let i = self.keys.len();
        self.keys.push(key);
        self.set_pos(map, i);
        self.sift_up(map, i);
    }

    /// Re-heapifies a key after its deadline changed. No-op when the entry
    /// is not in the heap.
    pub fn fix(&mut self, map: &mut HashMap<Value, Entry>, key: &Value) {
        let Some(i) = map.get(key).and_then(|e| e.heap_pos) else {
            return;
        };
        if self.sift_up(map, i) == i {
            self.sift_down(map, i);
        }
    }

    /// Removes a key by its stored position. No-op when the entry is not in
    /// the heap.
    pub fn remove(&mut self, map: &mut HashMap<Value, Entry>, key: &Value) {
        let Some(i) = map.get(key).and_then(|e| e.heap_pos) else {
            return;
        };
        self.remove_at(map, i);
    }

    fn remove_at(&mut self, map: &mut HashMap<Value, Entry>, i: usize) -> Value {
        let last = self.keys.len() - 1;
        if i != last {
            self.swap(map, i, last);
        }
        let removed = self.keys.pop().unwrap_or_default();
        if let Some(entry) = map.get_mut(&removed) {
            entry.heap_pos = None;
        }
        if i < self.keys.len() && self.sift_up(map, i) == i {
            self.sift_down(map, i);
        }
        removed
    }

    /// Pops the root when its deadline has passed. Returns the key, or
    /// `None` when the heap is empty or the root is still live.
    pub fn pop_expired(&mut self, map: &mut HashMap<Value, Entry>, now: Instant) -> Option<Value> {
        if self.keys.is_empty() {
            return None;
        }
        if self.deadline(map, 0) > now {
            return None;
        }
        Some(self.remove_at(map, 0))
    }

    #[cfg(test)]
    pub(crate) fn key_at(&self, i: usize) -> &Value {
        &self.keys[i]
    }
}
