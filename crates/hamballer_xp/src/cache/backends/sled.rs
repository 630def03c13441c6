//! Sled storage backend
//!
//! Provides persistent, transactional storage using the Sled embedded database.
//! Entries live in the `proofs` tree; the `expiry` tree is a secondary index
//! ordered by expiry time so sweeps never scan the whole cache.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;

use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::ProofKey;
use crate::error::CacheError;

/// Sled-based storage backend
pub struct SledBackend {
    /// The Sled database
    db: sled::Db,
    /// Entries by proof key
    proofs: sled::Tree,
    /// `expiry_millis ++ key -> key`
    expiry: sled::Tree,
}

impl SledBackend {
    /// Open or create a Sled database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path)
            .map_err(|e| CacheError::Storage(format!("failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    /// Open a temporary database (for testing)
    pub fn temp() -> Result<Self, CacheError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CacheError::Storage(format!("failed to create temp db: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, CacheError> {
        let proofs = db
            .open_tree("proofs")
            .map_err(|e| CacheError::Storage(format!("failed to open proofs tree: {}", e)))?;
        let expiry = db
            .open_tree("expiry")
            .map_err(|e| CacheError::Storage(format!("failed to open expiry tree: {}", e)))?;
        Ok(Self { db, proofs, expiry })
    }
}

/// Big-endian, sign-flipped millis so byte order matches time order.
fn expiry_prefix(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
}

fn expiry_index_key(entry: &CacheEntry) -> Vec<u8> {
    let mut key = expiry_prefix(entry.expires_at).to_vec();
    key.extend_from_slice(entry.hash.as_bytes());
    key
}

fn transaction_error(err: TransactionError<CacheError>) -> CacheError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => CacheError::Storage(format!("sled transaction error: {}", e)),
    }
}

impl CacheBackend for SledBackend {
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = entry.to_bytes()?;
        let index_key = expiry_index_key(entry);
        let key = entry.hash.as_bytes();

        (&self.proofs, &self.expiry)
            .transaction(|(proofs, expiry)| {
                if let Some(previous) = proofs.insert(key, bytes.as_slice())? {
                    if let Ok(previous) = CacheEntry::from_bytes(&previous) {
                        expiry.remove(expiry_index_key(&previous))?;
                    }
                }
                expiry.insert(index_key.as_slice(), key)?;
                Ok::<(), ConflictableTransactionError<CacheError>>(())
            })
            .map_err(transaction_error)
    }

    fn get(&self, key: &ProofKey) -> Result<Option<CacheEntry>, CacheError> {
        match self.proofs.get(key.as_bytes()) {
            Ok(Some(bytes)) => CacheEntry::from_bytes(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(CacheError::Storage(format!("sled get error: {}", e))),
        }
    }

    fn delete(&self, key: &ProofKey) -> Result<bool, CacheError> {
        let key = key.as_bytes();
        (&self.proofs, &self.expiry)
            .transaction(|(proofs, expiry)| {
                let Some(previous) = proofs.remove(key)? else {
                    return Ok(false);
                };
                if let Ok(previous) = CacheEntry::from_bytes(&previous) {
                    expiry.remove(expiry_index_key(&previous))?;
                }
                Ok::<bool, ConflictableTransactionError<CacheError>>(true)
            })
            .map_err(transaction_error)
    }

    fn get_all(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for result in self.proofs.iter() {
            match result {
                Ok((_, bytes)) => entries.push(CacheEntry::from_bytes(&bytes)?),
                Err(e) => return Err(CacheError::Storage(format!("sled iteration error: {}", e))),
            }
        }
        Ok(entries)
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.proofs
            .clear()
            .map_err(|e| CacheError::Storage(format!("sled clear error: {}", e)))?;
        self.expiry
            .clear()
            .map_err(|e| CacheError::Storage(format!("sled clear error: {}", e)))?;
        Ok(())
    }

    fn record_access(&self, key: &ProofKey, at: DateTime<Utc>) -> Result<bool, CacheError> {
        let key = key.as_bytes();
        // Expiry is unchanged, so the index tree is left alone.
        self.proofs
            .transaction(|proofs| {
                let Some(bytes) = proofs.get(key)? else {
                    return Ok(false);
                };
                let mut entry =
                    CacheEntry::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
                entry.touch(at);
                let bytes = entry.to_bytes().map_err(ConflictableTransactionError::Abort)?;
                proofs.insert(key, bytes)?;
                Ok::<bool, ConflictableTransactionError<CacheError>>(true)
            })
            .map_err(transaction_error)
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Result<Vec<ProofKey>, CacheError> {
        let mut keys = Vec::new();
        for result in self.expiry.range(..expiry_prefix(now).to_vec()) {
            match result {
                Ok((_, key)) => {
                    if let Some(key) = ProofKey::from_stored(&key) {
                        keys.push(key);
                    }
                }
                Err(e) => return Err(CacheError::Storage(format!("sled iteration error: {}", e))),
            }
        }
        Ok(keys)
    }

    fn count(&self) -> usize {
        self.proofs.len()
    }

    fn size_bytes(&self) -> usize {
        self.db.size_on_disk().unwrap_or(0) as usize
    }

    fn flush(&self) -> Result<(), CacheError> {
        self.db
            .flush()
            .map_err(|e| CacheError::Storage(format!("sled flush error: {}", e)))?;
        Ok(())
    }
}
