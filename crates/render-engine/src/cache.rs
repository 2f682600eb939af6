//! Fixed-capacity map that evicts the oldest inserted key.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Insertion-ordered bounded cache. Lookups do not refresh an entry's age.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert, evicting the oldest entries once over capacity. Replacing an
    /// existing key keeps its original position.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(slot) = self.map.get_mut(&key) {
            *slot = value;
            return;
        }
        while self.map.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    /// Cached value for `key`, computing and inserting it on a miss.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &V {
        if !self.map.contains_key(&key) {
            let value = make();
            self.insert(key.clone(), value);
        }
        // Present: either hit or just inserted (capacity >= 1).
        &self.map[&key]
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}
