// SPDX-License-Identifier: Apache-2.0

//! A bounded map with insertion-order eviction and age-based expiry.
//!
//! Every mutation that displaces an entry hands the displaced pair back to
//! the caller instead of dropping it, so accumulated state can be flushed
//! out (reports) or deliberately discarded (quota). The order queue is kept
//! sorted by write time: inserting or re-writing a key moves it to the
//! back, which makes both capacity eviction (pop the front) and expiry
//! sweeps (drain the front while stale) O(evicted).

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

struct Slot<V> {
    value: V,
    written_nanos: u64,
}

/// A size-bounded cache whose entries age out.
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    order: VecDeque<K>,
}

impl<K: Clone + Eq + Hash, V> BoundedCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// Callers gate construction on a positive configured size, so a zero
    /// capacity never caches anything.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read access to an entry.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Write access to an entry. Does not refresh the entry's write time.
    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    /// When the entry was last written, if present.
    #[must_use]
    pub fn written_nanos(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|slot| slot.written_nanos)
    }

    /// Inserts or replaces an entry, returning the pair evicted to stay
    /// within capacity (never the key just written).
    pub fn insert(&mut self, key: K, value: V, now_nanos: u64) -> Option<(K, V)> {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
            self.order.push_back(key.clone());
            let _ = self.entries.insert(
                key,
                Slot {
                    value,
                    written_nanos: now_nanos,
                },
            );
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };
        self.order.push_back(key.clone());
        let _ = self.entries.insert(
            key,
            Slot {
                value,
                written_nanos: now_nanos,
            },
        );
        evicted
    }

    /// Refreshes an entry's write time, pushing its expiry out.
    pub fn refresh_write(&mut self, key: &K, now_nanos: u64) -> bool {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        slot.written_nanos = now_nanos;
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
        true
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(slot.value)
    }

    /// Removes and returns every entry written at least `ttl_nanos` ago,
    /// oldest first.
    pub fn sweep_expired(&mut self, now_nanos: u64, ttl_nanos: u64) -> Vec<(K, V)> {
        let mut expired = Vec::new();
        while let Some(front) = self.order.front() {
            let stale = self
                .entries
                .get(front)
                .is_some_and(|slot| now_nanos.saturating_sub(slot.written_nanos) >= ttl_nanos);
            if !stale {
                break;
            }
            if let Some(pair) = self.pop_oldest() {
                expired.push(pair);
            }
        }
        expired
    }

    /// Removes and returns every entry, oldest first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut all = Vec::with_capacity(self.entries.len());
        while let Some(pair) = self.pop_oldest() {
            all.push(pair);
        }
        all
    }

    /// Iterates all entries with their write times, in no particular
    /// order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, u64, &mut V)> {
        self.entries
            .iter_mut()
            .map(|(k, slot)| (k, slot.written_nanos, &mut slot.value))
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_front()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest_insertion() {
        let mut cache = BoundedCache::new(2);
        assert!(cache.insert("a", 1, 10).is_none());
        assert!(cache.insert("b", 2, 20).is_none());
        let evicted = cache.insert("c", 3, 30);
        assert_eq!(evicted, Some(("a", 1)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let mut cache = BoundedCache::new(2);
        assert!(cache.insert("a", 1, 10).is_none());
        assert!(cache.insert("b", 2, 20).is_none());
        assert!(cache.insert("a", 9, 30).is_none());
        assert_eq!(cache.get(&"a"), Some(&9));
        // "a" was rewritten most recently, so "b" is now the oldest.
        let evicted = cache.insert("c", 3, 40);
        assert_eq!(evicted, Some(("b", 2)));
    }

    #[test]
    fn sweep_removes_only_stale_entries() {
        let mut cache = BoundedCache::new(10);
        assert!(cache.insert("a", 1, 0).is_none());
        assert!(cache.insert("b", 2, 500).is_none());
        let expired = cache.sweep_expired(1000, 600);
        assert_eq!(expired, vec![("a", 1)]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"b").is_some());
    }

    #[test]
    fn refresh_write_postpones_expiry() {
        let mut cache = BoundedCache::new(10);
        assert!(cache.insert("a", 1, 0).is_none());
        assert!(cache.refresh_write(&"a", 900));
        assert!(cache.sweep_expired(1000, 600).is_empty());
        assert_eq!(cache.sweep_expired(1500, 600), vec![("a", 1)]);
    }

    #[test]
    fn drain_returns_in_insertion_order() {
        let mut cache = BoundedCache::new(10);
        assert!(cache.insert("a", 1, 0).is_none());
        assert!(cache.insert("b", 2, 1).is_none());
        assert!(cache.insert("c", 3, 2).is_none());
        assert_eq!(cache.drain(), vec![("a", 1), ("b", 2), ("c", 3)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_clears_order_bookkeeping() {
        let mut cache = BoundedCache::new(2);
        assert!(cache.insert("a", 1, 0).is_none());
        assert_eq!(cache.remove(&"a"), Some(1));
        assert!(cache.insert("b", 2, 1).is_none());
        assert!(cache.insert("c", 3, 2).is_none());
        // Capacity is respected after the removal.
        assert_eq!(cache.len(), 2);
    }
}
