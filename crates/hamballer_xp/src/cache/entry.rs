//! Cache entries and their at-rest encoding.
//!
//! The nullifier and commitment of a cached artifact are kept base64-encoded
//! in storage and decoded on read. This only keeps the values from showing up
//! verbatim when someone browses the store; it is not encryption and provides
//! no confidentiality.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::key::ProofKey;
use crate::artifact::{Bytes32, ProofArtifact, PROOF_LEN};
use crate::error::CacheError;

/// Encode a value for storage.
pub(crate) fn obfuscate(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Decode a value written by [`obfuscate`].
pub(crate) fn reveal(encoded: &str) -> Result<String, CacheError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CacheError::Decoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CacheError::Decoding(e.to_string()))
}

/// A proof artifact as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    nullifier: String,
    commitment: String,
    proof: [Bytes32; PROOF_LEN],
    claimed_amount: u64,
    threshold: u64,
}

impl StoredArtifact {
    /// Encode the sensitive fields of an artifact.
    pub fn conceal(artifact: &ProofArtifact) -> Self {
        Self {
            nullifier: obfuscate(artifact.nullifier.as_str()),
            commitment: obfuscate(artifact.commitment.as_str()),
            proof: artifact.proof.clone(),
            claimed_amount: artifact.claimed_amount,
            threshold: artifact.threshold,
        }
    }

    /// Decode back into a typed artifact.
    pub fn reveal(&self) -> Result<ProofArtifact, CacheError> {
        let nullifier = Bytes32::parse(&reveal(&self.nullifier)?).map_err(CacheError::Decoding)?;
        let commitment =
            Bytes32::parse(&reveal(&self.commitment)?).map_err(CacheError::Decoding)?;
        Ok(ProofArtifact {
            nullifier,
            commitment,
            proof: self.proof.clone(),
            claimed_amount: self.claimed_amount,
            threshold: self.threshold,
        })
    }
}

/// A cached artifact with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub hash: ProofKey,
    /// Player identity the proof was generated for.
    pub subject_identity: String,
    /// Claimed XP amount.
    pub claimed_amount: u64,
    /// Run or session identifier.
    pub context_id: String,
    /// The artifact with obfuscated sensitive fields.
    pub artifact: StoredArtifact,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being served.
    pub expires_at: DateTime<Utc>,
    /// Number of reads served from this entry.
    pub access_count: u64,
    /// Time of the most recent read.
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry expiring `ttl_hours` after `now`. Negative TTLs yield
    /// an entry that is already expired.
    pub fn new(
        hash: ProofKey,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
        artifact: &ProofArtifact,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = Duration::try_hours(ttl_hours).unwrap_or(if ttl_hours < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        });
        let expires_at = now.checked_add_signed(ttl).unwrap_or(if ttl_hours < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });

        Self {
            hash,
            subject_identity: subject_identity.to_string(),
            claimed_amount,
            context_id: context_id.to_string(),
            artifact: StoredArtifact::conceal(artifact),
            created_at: now,
            expires_at,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Whether `expires_at` has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Record a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    /// Decoded artifact.
    pub fn artifact(&self) -> Result<ProofArtifact, CacheError> {
        self.artifact.reveal()
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full cache backup with decoded artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Snapshot format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// All entries at export time.
    pub entries: Vec<SnapshotEntry>,
}

/// One entry of a [`CacheSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    /// Key the entry was stored under.
    pub hash: ProofKey,
    /// Player identity the proof was generated for.
    pub subject_identity: String,
    /// Claimed XP amount.
    pub claimed_amount: u64,
    /// Run or session identifier.
    pub context_id: String,
    /// The artifact, decoded.
    pub artifact: ProofArtifact,
    /// When the entry was first written.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being served.
    pub expires_at: DateTime<Utc>,
    /// Reads served before the export.
    pub access_count: u64,
    /// Time of the most recent read.
    pub last_accessed_at: DateTime<Utc>,
}

impl SnapshotEntry {
    /// Decode a stored entry for export.
    pub fn from_entry(entry: &CacheEntry) -> Result<Self, CacheError> {
        Ok(Self {
            hash: entry.hash.clone(),
            subject_identity: entry.subject_identity.clone(),
            claimed_amount: entry.claimed_amount,
            context_id: entry.context_id.clone(),
            artifact: entry.artifact()?,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
        })
    }

    /// Re-encode for storage, keeping the original timestamps.
    pub fn into_entry(self) -> CacheEntry {
        CacheEntry {
            hash: self.hash,
            subject_identity: self.subject_identity,
            claimed_amount: self.claimed_amount,
            context_id: self.context_id,
            artifact: StoredArtifact::conceal(&self.artifact),
            created_at: self.created_at,
            expires_at: self.expires_at,
            access_count: self.access_count,
            last_accessed_at: self.last_accessed_at,
        }
    }
}
