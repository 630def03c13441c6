//! Bounded in-memory front layer of the proof cache.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::entry::CacheEntry;
use super::key::ProofKey;

/// Default number of entries kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

/// Insertion-ordered map with a size bound.
///
/// When full, the entry inserted longest ago is evicted. Reads do not change
/// the order; re-inserting a key moves it to the back.
pub(crate) struct MemoryLayer {
    capacity: usize,
    entries: IndexMap<ProofKey, CacheEntry>,
}

impl MemoryLayer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity.min(1024)),
        }
    }

    pub(crate) fn get_mut(&mut self, key: &ProofKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// Insert an entry, returning the key evicted to make room, if any.
    pub(crate) fn insert(&mut self, entry: CacheEntry) -> Option<ProofKey> {
        if self.capacity == 0 {
            return None;
        }

        self.entries.shift_remove(&entry.hash);

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0).map(|(key, _)| key)
        } else {
            None
        };

        self.entries.insert(entry.hash.clone(), entry);
        evicted
    }

    pub(crate) fn remove(&mut self, key: &ProofKey) -> Option<CacheEntry> {
        self.entries.shift_remove(key)
    }

    /// Drop every expired entry, returning how many were removed.
    pub(crate) fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<ProofKey> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::sample_artifact;

    fn entry(context: &str, ttl_hours: i64) -> CacheEntry {
        CacheEntry::new(
            ProofKey::compute("0xAAA", 10, context, ""),
            "0xAAA",
            10,
            context,
            &sample_artifact(1),
            ttl_hours,
            Utc::now(),
        )
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut layer = MemoryLayer::new(3);
        let a = entry("a", 1);
        let b = entry("b", 1);
        let c = entry("c", 1);
        let d = entry("d", 1);

        layer.insert(a.clone());
        layer.insert(b.clone());
        layer.insert(c.clone());

        // Reads do not protect an entry from eviction
        layer.get_mut(&a.hash).unwrap().touch(Utc::now());

        let evicted = layer.insert(d.clone());
        assert_eq!(evicted, Some(a.hash.clone()));
        assert_eq!(layer.len(), 3);
        assert_eq!(layer.keys(), vec![b.hash, c.hash, d.hash]);
    }

    #[test]
    fn test_reinsert_moves_to_back() {
        let mut layer = MemoryLayer::new(2);
        let a = entry("a", 1);
        let b = entry("b", 1);
        let c = entry("c", 1);

        layer.insert(a.clone());
        layer.insert(b.clone());
        assert_eq!(layer.insert(a.clone()), None);

        let evicted = layer.insert(c.clone());
        assert_eq!(evicted, Some(b.hash));
        assert_eq!(layer.keys(), vec![a.hash, c.hash]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut layer = MemoryLayer::new(0);
        assert_eq!(layer.insert(entry("a", 1)), None);
        assert_eq!(layer.len(), 0);
    }

    #[test]
    fn test_remove_expired() {
        let mut layer = MemoryLayer::new(10);
        layer.insert(entry("fresh", 1));
        layer.insert(entry("stale", -1));

        assert_eq!(layer.remove_expired(Utc::now()), 1);
        assert_eq!(layer.len(), 1);

        layer.clear();
        assert_eq!(layer.len(), 0);
    }
}
