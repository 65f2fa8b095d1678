//! Keyspace storage: map + TTL heap behind a read/write facade

pub mod heap;
pub mod object;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::value::Value;
use heap::TtlHeap;
use object::StoredValue;

/// Saturation bound for deadlines that would overflow the monotonic clock.
const MAX_TTL_SECS: u64 = 60 * 60 * 24 * 365 * 100;

/// One keyspace slot: the stored object, an optional absolute deadline and
/// the entry's position in the TTL heap. An entry is in the heap iff its
/// deadline is set.
#[derive(Debug)]
pub struct Entry {
    pub(crate) object: StoredValue,
    pub(crate) deadline: Option<Instant>,
    pub(crate) heap_pos: Option<usize>,
}

impl Entry {
    fn new(object: StoredValue) -> Self {
        Self {
            object,
            deadline: None,
            heap_pos: None,
        }
    }

    pub(crate) fn expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }
}

/// The unsynchronized keyspace. All synchronization lives in [`Storage`];
/// commands reach a `RawStore` only through the read/write facade.
#[derive(Debug, Default)]
pub struct RawStore {
    map: HashMap<Value, Entry>,
    heap: TtlHeap,
}

impl RawStore {
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Live (non-expired) lookup.
    pub fn get(&self, key: &Value) -> Option<&StoredValue> {
        let now = self.now();
        self.map
            .get(key)
            .filter(|e| !e.expired(now))
            .map(|e| &e.object)
    }

    /// Live lookup for in-place mutation.
    pub fn get_mut(&mut self, key: &Value) -> Option<&mut StoredValue> {
        let now = self.now();
        self.map
            .get_mut(key)
            .filter(|e| !e.expired(now))
            .map(|e| &mut e.object)
    }

    /// Whole seconds until expiry: -2 when the key is absent or expired,
    /// -1 when it has no deadline.
    pub fn ttl(&self, key: &Value) -> i64 {
        let now = self.now();
        match self.map.get(key) {
            Some(e) if !e.expired(now) => match e.deadline {
                None => -1,
                Some(d) => d.saturating_duration_since(now).as_secs() as i64,
            },
            _ => -2,
        }
    }

    /// Unordered snapshot of the live keys.
    pub fn keys(&self) -> Vec<Value> {
        let now = self.now();
        self.map
            .iter()
            .filter(|(_, e)| !e.expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Replaces whatever the key held, dropping any previous deadline and
    /// heap membership. Runs lazy cleanup first.
    pub fn set(&mut self, key: Value, object: StoredValue) {
        self.cleanup();
        if self.map.contains_key(&key) {
            self.heap.remove(&mut self.map, &key);
        }
        self.map.insert(key, Entry::new(object));
    }

    /// Sets the deadline `secs` seconds from now (negatives clamp to zero,
    /// i.e. expiry on the next observation). False when the key is absent
    /// or already expired. Runs lazy cleanup before returning.
    pub fn set_ttl(&mut self, key: &Value, secs: i64) -> bool {
        let updated = self.update_deadline(key, secs);
        self.cleanup();
        updated
    }

    fn update_deadline(&mut self, key: &Value, secs: i64) -> bool {
        let now = self.now();
        let secs = secs.max(0) as u64;
        let deadline = now
            .checked_add(Duration::from_secs(secs))
            .unwrap_or_else(|| now + Duration::from_secs(MAX_TTL_SECS));

        let had_deadline = match self.map.get_mut(key) {
            Some(e) if !e.expired(now) => {
                let had = e.deadline.is_some();
                e.deadline = Some(deadline);
                had
            }
            _ => return false,
        };
        if had_deadline {
            self.heap.fix(&mut self.map, key);
        } else {
            self.heap.push(&mut self.map, key.clone());
        }
        true
    }

    /// Removes the key. True iff it was present and live; the heap node
    /// goes with it.
    pub fn delete(&mut self, key: &Value) -> bool {
        let now = self.now();
        let live = matches!(self.map.get(key), Some(e) if !e.expired(now));
        if !live {
            return false;
        }
        self.heap.remove(&mut self.map, key);
        self.map.remove(key);
        true
    }

    /// Drains the heap of entries whose deadline has passed, removing their
    /// keys. A popped node whose entry turns out to still be live (the heap
    /// held a stale view) is pushed back.
    fn cleanup(&mut self) {
        loop {
            let now = self.now();
            let Some(key) = self.heap.pop_expired(&mut self.map, now) else {
                break;
            };
            let state = self
                .map
                .get(&key)
                .map(|e| (e.expired(now), e.deadline.is_some()));
            match state {
                Some((true, _)) => {
                    self.map.remove(&key);
                }
                Some((false, true)) => {
                    self.heap.push(&mut self.map, key);
                }
                _ => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, key: &Value) -> Option<&Entry> {
        self.map.get(key)
    }

    #[cfg(test)]
    pub(crate) fn map_len(&self) -> usize {
        self.map.len()
    }

    #[cfg(test)]
    pub(crate) fn heap_len(&self) -> usize {
        self.heap.len()
    }
}

/// Read/write facade over the keyspace: one lock around the whole store,
/// shared for reads and exclusive for writes. Commands run to completion
/// under the lock, which is what gives each command its per-call
/// linearization.
#[derive(Debug, Default)]
pub struct Storage {
    inner: RwLock<RawStore>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T>(&self, fun: impl FnOnce(&RawStore) -> T) -> T {
        fun(&self.inner.read())
    }

    pub fn write<T>(&self, fun: impl FnOnce(&mut RawStore) -> T) -> T {
        fun(&mut self.inner.write())
    }
}
