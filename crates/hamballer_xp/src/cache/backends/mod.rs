//! Durable storage backends for the proof cache
//!
//! - Memory: in-process storage (testing/ephemeral)
//! - Sled: embedded transactional database (default for persistent caches)

pub mod memory;
pub mod sled;

use chrono::{DateTime, Utc};

use super::entry::CacheEntry;
use super::key::ProofKey;
use crate::error::CacheError;

/// Trait for cache storage backends
pub trait CacheBackend: Send + Sync {
    /// Store an entry, replacing any entry under the same key
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Get an entry by key
    fn get(&self, key: &ProofKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Delete an entry, returning whether it existed
    fn delete(&self, key: &ProofKey) -> Result<bool, CacheError>;

    /// All stored entries
    fn get_all(&self) -> Result<Vec<CacheEntry>, CacheError>;

    /// Remove every entry
    fn clear(&self) -> Result<(), CacheError>;

    /// Record a read of an existing entry in place, returning `false` when the
    /// key is absent. Never recreates a deleted entry.
    fn record_access(&self, key: &ProofKey, at: DateTime<Utc>) -> Result<bool, CacheError>;

    /// Keys whose entries expired before `now`
    fn expired_keys(&self, now: DateTime<Utc>) -> Result<Vec<ProofKey>, CacheError>;

    /// Count stored entries
    fn count(&self) -> usize;

    /// Get storage size in bytes (approximate)
    fn size_bytes(&self) -> usize;

    /// Flush pending writes to disk
    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

pub use self::memory::MemoryBackend;
pub use self::sled::SledBackend;
