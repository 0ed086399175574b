//! Bounded FIFO cache with threshold eviction.
//!
//! Once `capacity` entries are stored, the next insertion of a new key first
//! evicts the oldest `ceil(capacity * eviction_fraction)` entries (at least
//! one). Replacing an existing key keeps its original insertion slot.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Share of the capacity evicted when the cache is full
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.2;

/// Insertion-ordered cache with a fixed capacity
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    eviction_fraction: f64,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache evicting [`DEFAULT_EVICTION_FRACTION`] when full
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_eviction_fraction(capacity, DEFAULT_EVICTION_FRACTION)
    }

    /// Create a cache with a custom eviction fraction (clamped to `(0, 1]`)
    #[must_use]
    pub fn with_eviction_fraction(capacity: usize, fraction: f64) -> Self {
        let eviction_fraction = if fraction.is_finite() && fraction > 0.0 {
            fraction.min(1.0)
        } else {
            DEFAULT_EVICTION_FRACTION
        };
        Self {
            capacity: capacity.max(1),
            eviction_fraction,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries removed per eviction round
    #[must_use]
    pub fn eviction_batch(&self) -> usize {
        ((self.capacity as f64 * self.eviction_fraction).ceil() as usize).max(1)
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Check if a key is stored
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace an entry, returning how many entries were evicted
    pub fn insert(&mut self, key: K, value: V) -> usize {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return 0;
        }

        let mut evicted = 0;
        if self.entries.len() >= self.capacity {
            for _ in 0..self.eviction_batch() {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                evicted += 1;
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_fifth_when_full() {
        let mut cache = BoundedCache::new(10);
        for i in 0..10 {
            assert_eq!(cache.insert(i, i * 10), 0);
        }
        assert_eq!(cache.len(), 10);

        assert_eq!(cache.insert(10, 100), 2);
        assert_eq!(cache.len(), 9);
        assert!(!cache.contains(&0));
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert_eq!(cache.get(&10), Some(&100));
    }

    #[test]
    fn test_replace_keeps_slot() {
        let mut cache = BoundedCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(&3));
        let keys: Vec<_> = cache.keys().copied().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_small_capacity_evicts_at_least_one() {
        let mut cache = BoundedCache::new(2);
        assert_eq!(cache.eviction_batch(), 1);
        cache.insert(1, ());
        cache.insert(2, ());
        assert_eq!(cache.insert(3, ()), 1);
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_zero_capacity_and_bad_fraction() {
        let cache: BoundedCache<u8, u8> = BoundedCache::with_eviction_fraction(0, f64::NAN);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.eviction_batch(), 1);
        let cache: BoundedCache<u8, u8> = BoundedCache::with_eviction_fraction(10, 0.5);
        assert_eq!(cache.eviction_batch(), 5);
    }

    #[test]
    fn test_clear() {
        let mut cache = BoundedCache::new(4);
        cache.insert(1, 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.keys().count(), 0);
    }
}
