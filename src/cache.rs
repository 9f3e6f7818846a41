//! Bounded least-recently-used cache.
//!
//! Backs the override match cache and the skip-call cache. Both are
//! small (capacity 50), so eviction scans for the oldest access tick
//! instead of maintaining a linked order.

use std::collections::HashMap;
use std::hash::Hash;

/// Capacity shared by the override match cache and the skip-call cache.
pub const CACHE_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(value, last)| {
            *last = tick;
            &*value
        })
    }

    /// Mutable lookup, also marking as most recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(value, last)| {
            *last = tick;
            value
        })
    }

    /// Insert, evicting the least recently used entry at capacity.
    pub fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, last))| *last)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, self.tick));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
