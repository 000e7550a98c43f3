// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Hash-keyed store of native kernel objects
//!
//! The content-addressable cache and the handle registry are this one table: a
//! cached result is reachable by the key it was computed under, and that same key is
//! the `hash` of the handle given to the caller.

use crate::handle::Handle;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

struct Entry<O> {
    kind_tag: String,
    object: O,
}

/// Store owned by exactly one executor
pub struct HandleStore<O> {
    entries: AHashMap<u64, Entry<O>>,
    hits: u64,
    misses: u64,
}

impl<O> HandleStore<O> {
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Memoization lookup; counts a hit or a miss
    pub fn lookup(&mut self, key: u64) -> Option<Handle> {
        match self.entries.get(&key) {
            Some(entry) => {
                self.hits += 1;
                Some(Handle::new(key, entry.kind_tag.clone()))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Resolve a handle to its object. The kind tag must match as well as the hash.
    pub fn resolve(&self, handle: &Handle) -> Option<&O> {
        self.entries
            .get(&handle.hash)
            .filter(|entry| entry.kind_tag == handle.kind_tag)
            .map(|entry| &entry.object)
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Insert an object under `key` and mint its handle
    pub fn insert(&mut self, key: u64, kind_tag: &str, object: O) -> Handle {
        self.entries.insert(
            key,
            Entry {
                kind_tag: kind_tag.to_string(),
                object,
            },
        );
        Handle::new(key, kind_tag)
    }

    /// Remove one entry; returns whether it existed
    pub fn remove(&mut self, handle: &Handle) -> bool {
        if !self.contains(handle) {
            return false;
        }
        self.entries.remove(&handle.hash).is_some()
    }

    /// Remove a batch of entries; returns how many existed
    pub fn remove_many<'a>(&mut self, handles: impl IntoIterator<Item = &'a Handle>) -> usize {
        handles
            .into_iter()
            .filter(|handle| self.remove(handle))
            .count()
    }

    /// Drop every entry, invalidating all outstanding handles
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

impl<O> Default for HandleStore<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Percentage of lookups answered from the cache
    pub fn hit_rate(&self) -> f32 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f32 / lookups as f32) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} hits, {} misses ({:.1}% hit rate)",
            self.entries,
            self.hits,
            self.misses,
            self.hit_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_resolve() {
        let mut store = HandleStore::new();
        let handle = store.insert(10, "manifold-shape", "cube");
        assert_eq!(handle, Handle::new(10, "manifold-shape"));
        assert_eq!(store.resolve(&handle), Some(&"cube"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_kind_tag_must_match() {
        let mut store = HandleStore::new();
        store.insert(10, "manifold-shape", 1);
        assert!(store.resolve(&Handle::new(10, "manifold-cross-section")).is_none());
        assert!(!store.remove(&Handle::new(10, "manifold-cross-section")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookup_counts() {
        let mut store = HandleStore::new();
        assert!(store.lookup(1).is_none());
        store.insert(1, "k", ());
        assert!(store.lookup(1).is_some());
        assert!(store.lookup(1).is_some());

        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 66.666_67).abs() < 0.01);
    }

    #[test]
    fn test_remove_many_and_clear() {
        let mut store = HandleStore::new();
        let a = store.insert(1, "k", 'a');
        let b = store.insert(2, "k", 'b');
        store.insert(3, "k", 'c');

        let missing = Handle::new(99, "k");
        assert_eq!(store.remove_many([&a, &b, &missing]), 2);
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().hits, 0);
    }

    #[test]
    fn test_stats_summary() {
        let stats = CacheStats {
            entries: 3,
            hits: 2,
            misses: 1,
        };
        assert_eq!(
            stats.to_string(),
            "3 entries, 2 hits, 1 misses (66.7% hit rate)"
        );
    }

    #[test]
    fn test_empty_hit_rate() {
        assert_eq!(HandleStore::<()>::new().stats().hit_rate(), 0.0);
    }
}
