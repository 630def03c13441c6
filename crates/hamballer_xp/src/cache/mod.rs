//! Proof cache storage
//!
//! Durable, TTL-bounded storage of proof artifacts keyed by [`ProofKey`], with
//! a bounded in-memory layer in front of the durable backend.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ProofCacheStore                │
//! ├──────────────────────────────────────────────┤
//! │  ┌──────────────┐  miss   ┌───────────────┐  │
//! │  │ MemoryLayer  │────────▶│ CacheBackend  │  │
//! │  │ (IndexMap)   │◀────────│ (sled/memory) │  │
//! │  └──────────────┘ promote └───────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every read is recorded in the backend, so access metadata in exports
//! matches what callers saw even when the memory layer served the hit.
//!
//! Caching only speeds things up. Storage errors are logged and turned into
//! misses or failed [`CacheWriteResult`]s; nothing here returns an error to
//! the caller.

pub mod backends;
pub mod entry;
pub mod key;
mod memory_layer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use backends::{CacheBackend, MemoryBackend, SledBackend};
pub use entry::{CacheEntry, CacheSnapshot, SnapshotEntry, SNAPSHOT_VERSION};
pub use key::{compute_key, ProofKey};
pub use memory_layer::DEFAULT_MEMORY_CAPACITY;

use crate::artifact::{ProofArtifact, ProofRequest};
use crate::error::CacheError;
use memory_layer::MemoryLayer;

/// Default lifetime of a cached proof.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Outcome of a cache write.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheWriteResult {
    /// Whether the entry reached durable storage.
    pub success: bool,
    /// Key the entry was written under.
    pub key: ProofKey,
    /// Failure description when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheWriteResult {
    fn ok(key: ProofKey) -> Self {
        Self {
            success: true,
            key,
            error: None,
        }
    }

    fn failure(key: ProofKey, error: String) -> Self {
        Self {
            success: false,
            key,
            error: Some(error),
        }
    }
}

/// Statistics for the proof cache
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in durable storage
    pub count: usize,
    /// Approximate durable storage size in bytes
    pub approximate_byte_size: usize,
    /// Entries in the memory layer
    pub in_memory_count: usize,
}

/// Proof cache with a durable backend and an in-memory front layer
pub struct ProofCacheStore {
    /// Durable storage
    backend: Arc<dyn CacheBackend>,
    /// Bounded memory layer
    memory: Arc<RwLock<MemoryLayer>>,
    /// TTL used by [`ProofCacheStore::put`]
    default_ttl_hours: i64,
}

impl ProofCacheStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a store with a custom memory layer size
    pub fn with_capacity(backend: Arc<dyn CacheBackend>, memory_capacity: usize) -> Self {
        Self {
            backend,
            memory: Arc::new(RwLock::new(MemoryLayer::new(memory_capacity))),
            default_ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    /// Create a store backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a sled-backed store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(SledBackend::open(path)?)))
    }

    /// Override the TTL used by [`ProofCacheStore::put`]
    pub fn with_default_ttl_hours(mut self, ttl_hours: i64) -> Self {
        self.default_ttl_hours = ttl_hours;
        self
    }

    /// Look up a cached artifact
    pub async fn get(
        &self,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
    ) -> Option<ProofArtifact> {
        let key = compute_key(subject_identity, claimed_amount, context_id, "");
        self.get_by_key(&key).await
    }

    /// Look up a cached artifact by key
    pub async fn get_by_key(&self, key: &ProofKey) -> Option<ProofArtifact> {
        let now = Utc::now();
        if let Some(artifact) = self.get_from_memory(key, now).await {
            return Some(artifact);
        }

        let mut entry = self.load_live(key)?;
        let artifact = self.decode_or_discard(&entry)?;
        if !self.record_access(key, now) {
            return None;
        }
        entry.touch(now);
        self.memory.write().await.insert(entry);

        debug!(key = %key, "proof cache hit (durable)");
        Some(artifact)
    }

    /// Store an artifact with the default TTL
    pub async fn put(
        &self,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
        artifact: &ProofArtifact,
    ) -> CacheWriteResult {
        self.put_with_ttl(
            subject_identity,
            claimed_amount,
            context_id,
            artifact,
            self.default_ttl_hours,
        )
        .await
    }

    /// Store an artifact expiring `ttl_hours` from now
    pub async fn put_with_ttl(
        &self,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
        artifact: &ProofArtifact,
        ttl_hours: i64,
    ) -> CacheWriteResult {
        let key = compute_key(subject_identity, claimed_amount, context_id, "");
        let entry = CacheEntry::new(
            key.clone(),
            subject_identity,
            claimed_amount,
            context_id,
            artifact,
            ttl_hours,
            Utc::now(),
        );

        if let Err(e) = self.backend.put(&entry) {
            warn!(key = %key, error = %e, "failed to cache proof");
            return CacheWriteResult::failure(key, e.to_string());
        }

        if let Some(evicted) = self.memory.write().await.insert(entry) {
            debug!(key = %evicted, "evicted proof from memory layer");
        }

        self.spawn_sweep();
        debug!(key = %key, ttl_hours, "cached proof");
        CacheWriteResult::ok(key)
    }

    /// Look up many artifacts at once
    ///
    /// Keys are deduplicated, memory hits are resolved under a single lock and
    /// only the remaining keys go to the backend. Missing and expired entries
    /// are absent from the result.
    pub async fn get_batch(&self, requests: &[ProofRequest]) -> HashMap<ProofKey, ProofArtifact> {
        let mut results = HashMap::new();
        let mut seen = HashSet::new();
        let mut misses = Vec::new();
        let now = Utc::now();

        {
            let mut memory = self.memory.write().await;
            for request in requests {
                let key = request.key();
                if !seen.insert(key.clone()) {
                    continue;
                }
                match Self::read_memory(&mut memory, &key, now) {
                    Some(artifact) => {
                        results.insert(key, artifact);
                    }
                    None => misses.push(key),
                }
            }
        }

        let gone: Vec<ProofKey> = results
            .keys()
            .filter(|key| !self.record_access(key, now))
            .cloned()
            .collect();

        let mut promoted = Vec::new();
        for key in misses {
            let Some(mut entry) = self.load_live(&key) else {
                continue;
            };
            let Some(artifact) = self.decode_or_discard(&entry) else {
                continue;
            };
            if self.record_access(&key, now) {
                entry.touch(now);
                results.insert(key, artifact);
                promoted.push(entry);
            }
        }

        if !gone.is_empty() || !promoted.is_empty() {
            let mut memory = self.memory.write().await;
            for key in &gone {
                memory.remove(key);
                results.remove(key);
            }
            for entry in promoted {
                memory.insert(entry);
            }
        }

        results
    }

    /// Remove one entry from both layers
    pub async fn delete(&self, key: &ProofKey) -> bool {
        let in_memory = self.memory.write().await.remove(key).is_some();
        match self.backend.delete(key) {
            Ok(removed) => removed || in_memory,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to delete cached proof");
                false
            }
        }
    }

    /// Remove every entry from both layers
    pub async fn clear_all(&self) -> bool {
        self.memory.write().await.clear();
        match self.backend.clear() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to clear proof cache");
                false
            }
        }
    }

    /// Export every durable entry with decoded artifacts
    ///
    /// Returns `None` when the backend cannot be read. Entries that fail to
    /// decode are skipped.
    pub async fn export_all(&self) -> Option<CacheSnapshot> {
        let entries = match self.backend.get_all() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to export proof cache");
                return None;
            }
        };

        let entries = entries
            .iter()
            .filter_map(|entry| match SnapshotEntry::from_entry(entry) {
                Ok(exported) => Some(exported),
                Err(e) => {
                    warn!(key = %entry.hash, error = %e, "skipping undecodable cache entry");
                    None
                }
            })
            .collect();

        Some(CacheSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            entries,
        })
    }

    /// Restore entries from a snapshot, re-encoding artifacts
    ///
    /// Imported keys are dropped from the memory layer so the next read sees
    /// the restored artifact.
    pub async fn import_all(&self, snapshot: CacheSnapshot) -> bool {
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                version = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "unsupported proof cache snapshot version"
            );
            return false;
        }

        let total = snapshot.entries.len();
        let mut memory = self.memory.write().await;
        for exported in snapshot.entries {
            let entry = exported.into_entry();
            if let Err(e) = self.backend.put(&entry) {
                warn!(key = %entry.hash, error = %e, "failed to import cached proof");
                return false;
            }
            memory.remove(&entry.hash);
        }

        debug!(entries = total, "imported proof cache snapshot");
        true
    }

    /// Get statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            count: self.backend.count(),
            approximate_byte_size: self.backend.size_bytes(),
            in_memory_count: self.memory.read().await.len(),
        }
    }

    /// Remove expired entries from both layers, returning how many durable
    /// entries were deleted
    pub async fn sweep_expired(&self) -> usize {
        sweep(self.backend.as_ref(), &self.memory).await
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> bool {
        match self.backend.flush() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to flush proof cache");
                false
            }
        }
    }

    async fn get_from_memory(&self, key: &ProofKey, now: DateTime<Utc>) -> Option<ProofArtifact> {
        let artifact = Self::read_memory(&mut *self.memory.write().await, key, now)?;
        if !self.record_access(key, now) {
            // Deleted underneath us through a shared backend
            self.memory.write().await.remove(key);
            return None;
        }
        debug!(key = %key, "proof cache hit (memory)");
        Some(artifact)
    }

    /// Serve from the memory layer, dropping expired or undecodable entries.
    fn read_memory(
        memory: &mut MemoryLayer,
        key: &ProofKey,
        now: DateTime<Utc>,
    ) -> Option<ProofArtifact> {
        let outcome = memory.get_mut(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                entry.touch(now);
                Some(entry.artifact())
            }
        });

        match outcome {
            Some(Some(Ok(artifact))) => Some(artifact),
            Some(Some(Err(e))) => {
                warn!(key = %key, error = %e, "dropping undecodable entry from memory layer");
                memory.remove(key);
                None
            }
            Some(None) => {
                memory.remove(key);
                None
            }
            None => None,
        }
    }

    /// Read an unexpired entry from the backend, deleting it if expired.
    fn load_live(&self, key: &ProofKey) -> Option<CacheEntry> {
        let entry = match self.backend.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key = %key, error = %e, "proof cache read failed");
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            debug!(key = %key, "cached proof expired");
            if let Err(e) = self.backend.delete(key) {
                warn!(key = %key, error = %e, "failed to delete expired proof");
            }
            return None;
        }

        Some(entry)
    }

    fn decode_or_discard(&self, entry: &CacheEntry) -> Option<ProofArtifact> {
        match entry.artifact() {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(key = %entry.hash, error = %e, "discarding undecodable cached proof");
                let _ = self.backend.delete(&entry.hash);
                None
            }
        }
    }

    /// Record a read in the backend. `false` means the entry is gone; a
    /// failed write is logged and does not hide the hit.
    fn record_access(&self, key: &ProofKey, at: DateTime<Utc>) -> bool {
        match self.backend.record_access(key, at) {
            Ok(present) => present,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to record proof cache access");
                true
            }
        }
    }

    fn spawn_sweep(&self) {
        let backend = Arc::clone(&self.backend);
        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            sweep(backend.as_ref(), &memory).await;
        });
    }
}

async fn sweep(backend: &dyn CacheBackend, memory: &RwLock<MemoryLayer>) -> usize {
    let now = Utc::now();
    memory.write().await.remove_expired(now);

    let keys = match backend.expired_keys(now) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "proof cache sweep failed");
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys {
        match backend.delete(&key) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to delete expired proof"),
        }
    }

    if removed > 0 {
        debug!(removed, "swept expired proofs");
    }
    removed
}

impl Default for ProofCacheStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
