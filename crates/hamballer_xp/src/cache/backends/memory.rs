//! In-memory storage backend
//!
//! Provides fast, ephemeral storage for tests and short-lived caches.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::ProofKey;
use crate::error::CacheError;

/// In-memory storage backend
pub struct MemoryBackend {
    /// Serialized entries
    entries: RwLock<HashMap<ProofKey, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> CacheError {
    CacheError::Storage("lock poisoned".into())
}

impl CacheBackend for MemoryBackend {
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = entry.to_bytes()?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(entry.hash.clone(), bytes);
        Ok(())
    }

    fn get(&self, key: &ProofKey) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(key)
            .map(|bytes| CacheEntry::from_bytes(bytes))
            .transpose()
    }

    fn delete(&self, key: &ProofKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn get_all(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .values()
            .map(|bytes| CacheEntry::from_bytes(bytes))
            .collect()
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.clear();
        Ok(())
    }

    fn record_access(&self, key: &ProofKey, at: DateTime<Utc>) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let Some(bytes) = entries.get_mut(key) else {
            return Ok(false);
        };
        let mut entry = CacheEntry::from_bytes(bytes)?;
        entry.touch(at);
        *bytes = entry.to_bytes()?;
        Ok(true)
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Result<Vec<ProofKey>, CacheError> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.hash)
            .collect())
    }

    fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    fn size_bytes(&self) -> usize {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, bytes)| key.as_bytes().len() + bytes.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backends::tests::entry;

    #[test]
    fn test_memory_backend_size() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.size_bytes(), 0);

        backend.put(&entry("a", 1)).unwrap();
        assert!(backend.size_bytes() > 0);
    }

    #[test]
    fn test_memory_backend_overwrite() {
        let backend = MemoryBackend::new();
        let mut e = entry("a", 1);
        backend.put(&e).unwrap();

        e.access_count = 7;
        backend.put(&e).unwrap();

        assert_eq!(backend.count(), 1);
        assert_eq!(backend.get(&e.hash).unwrap().unwrap().access_count, 7);
    }
}
