//! Deterministic proof keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain tag mixed into every key so keys never collide with other blake3
/// digests in the system.
const KEY_DOMAIN: &[u8] = b"hamballer-xp/proof-key/v1";

/// Content hash identifying a proof request.
///
/// Keys are `0x` + 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofKey(String);

impl ProofKey {
    /// Derive the key for `(subject, amount, context, nonce)`.
    ///
    /// Every field is length-prefixed, so `("ab", "c")` and `("a", "bc")`
    /// produce different keys.
    pub fn compute(subject_identity: &str, claimed_amount: u64, context_id: &str, nonce: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        write_field(&mut hasher, subject_identity.as_bytes());
        write_field(&mut hasher, &claimed_amount.to_be_bytes());
        write_field(&mut hasher, context_id.as_bytes());
        write_field(&mut hasher, nonce.as_bytes());
        Self(format!("0x{}", hasher.finalize().to_hex()))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key as bytes, for use as a storage key.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Rebuild a key read back from storage.
    pub(crate) fn from_stored(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(|s| Self(s.to_string()))
    }
}

impl fmt::Display for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Derive the cache key for a proof request.
pub fn compute_key(subject_identity: &str, claimed_amount: u64, context_id: &str, nonce: &str) -> ProofKey {
    ProofKey::compute(subject_identity, claimed_amount, context_id, nonce)
}
