//! Bounded in-memory LRU cache
//!
//! Holds rendered message bodies so re-opening a message does not
//! go back to the server. Entries are kept in an [`IndexMap`] whose
//! order is the recency order: index 0 is the least recently used
//! entry, the last index the most recently used one.

use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A thread-safe key/value store with exact least-recently-used
/// eviction.
///
/// Every operation, including [`get`](Self::get), takes the same
/// exclusive lock, since a hit reorders entries.
#[derive(Debug)]
pub struct Cache<V> {
    capacity: usize,
    entries: Mutex<IndexMap<String, V>>,
}

impl<V: Clone> Cache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive, got {capacity}");
        Self {
            capacity,
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let index = entries.get_index_of(key)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, value)| value.clone())
    }

    /// Insert or overwrite `key` as the most recently used entry,
    /// evicting the least recently used one when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut entries = self.lock();

        if let Some(index) = entries.get_index_of(&key) {
            let last = entries.len() - 1;
            entries.move_index(index, last);
            if let Some((_, slot)) = entries.get_index_mut(last) {
                *slot = value;
            }
            return;
        }

        if entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, value);
    }

    pub fn delete(&self, key: &str) {
        self.lock().shift_remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the map half-updated:
    // every mutation is a single IndexMap call.
    fn lock(&self) -> MutexGuard<'_, IndexMap<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
