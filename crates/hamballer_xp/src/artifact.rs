//! Proof artifact types and their schema parser.
//!
//! Deserializing a [`ProofArtifact`] goes through [`RawProofArtifact`], so a value of
//! the type always has well-formed 32-byte fields and exactly
//! [`PROOF_LEN`] proof elements. Responses from the remote generator and
//! imported snapshots go through the same parser.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::ProofKey;
use crate::error::{Result, XpError};

/// Number of elements in a proof.
pub const PROOF_LEN: usize = 8;

/// A `0x`-prefixed hex string encoding exactly 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bytes32(String);

impl Bytes32 {
    /// Parse a `0x` + 64 hex digit string.
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let digits = value
            .strip_prefix("0x")
            .ok_or_else(|| format!("expected 0x-prefixed hex, got {:?}", value))?;
        if digits.len() != 64 {
            return Err(format!(
                "expected 64 hex digits, got {} in {:?}",
                digits.len(),
                value
            ));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("non-hex character in {:?}", value));
        }
        Ok(Self(value.to_string()))
    }

    /// Build from raw bytes (lowercase hex).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// The string form, including the `0x` prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode into raw bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Shape is checked in `parse`, so decoding cannot fail.
        if let Ok(decoded) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&decoded);
        }
        out
    }
}

impl TryFrom<String> for Bytes32 {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Bytes32> for String {
    fn from(value: Bytes32) -> Self {
        value.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to redeem an XP claim on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawProofArtifact")]
pub struct ProofArtifact {
    /// One-time identifier preventing double redemption.
    pub nullifier: Bytes32,
    /// Binding value for the claimed amount.
    pub commitment: Bytes32,
    /// Proof elements.
    pub proof: [Bytes32; PROOF_LEN],
    /// XP amount being claimed.
    pub claimed_amount: u64,
    /// Threshold the claim was proven against.
    pub threshold: u64,
}

impl ProofArtifact {
    /// Parse a JSON body into a typed artifact.
    ///
    /// Any shape problem is reported as [`XpError::MalformedResponse`]; no
    /// partially valid artifact is ever produced.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawProofArtifact = serde_json::from_str(body)
            .map_err(|e| XpError::MalformedResponse(e.to_string()))?;
        Self::try_from(raw).map_err(XpError::MalformedResponse)
    }

    /// Check the semantic constraints a typed artifact can still violate.
    pub fn validate(&self) -> Result<()> {
        if self.claimed_amount == 0 {
            return Err(XpError::Validation(
                "claimed amount must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loosely typed artifact as it arrives over the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProofArtifact {
    nullifier: String,
    commitment: String,
    proof: Vec<String>,
    claimed_amount: u64,
    threshold: u64,
}

impl TryFrom<RawProofArtifact> for ProofArtifact {
    type Error = String;

    fn try_from(raw: RawProofArtifact) -> std::result::Result<Self, Self::Error> {
        let nullifier = Bytes32::parse(&raw.nullifier).map_err(|e| format!("nullifier: {}", e))?;
        let commitment =
            Bytes32::parse(&raw.commitment).map_err(|e| format!("commitment: {}", e))?;

        if raw.proof.len() != PROOF_LEN {
            return Err(format!(
                "proof must contain exactly {} elements, got {}",
                PROOF_LEN,
                raw.proof.len()
            ));
        }
        let elements = raw
            .proof
            .iter()
            .enumerate()
            .map(|(i, element)| Bytes32::parse(element).map_err(|e| format!("proof[{}]: {}", i, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let proof: [Bytes32; PROOF_LEN] = elements
            .try_into()
            .map_err(|_| "proof length changed during parsing".to_string())?;

        Ok(Self {
            nullifier,
            commitment,
            proof,
            claimed_amount: raw.claimed_amount,
            threshold: raw.threshold,
        })
    }
}

/// The inputs a proof is generated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// Player identity (usually a wallet address).
    pub subject_identity: String,
    /// XP amount being claimed.
    pub claimed_amount: u64,
    /// Run or session the XP was earned in.
    pub context_id: String,
}

impl ProofRequest {
    /// Create a new request.
    pub fn new(
        subject_identity: impl Into<String>,
        claimed_amount: u64,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_identity: subject_identity.into(),
            claimed_amount,
            context_id: context_id.into(),
        }
    }

    /// Cache and deduplication key for this request.
    pub fn key(&self) -> ProofKey {
        ProofKey::compute(
            &self.subject_identity,
            self.claimed_amount,
            &self.context_id,
            "",
        )
    }

    /// Reject requests that can never produce a proof.
    pub fn validate(&self) -> Result<()> {
        if self.subject_identity.trim().is_empty() {
            return Err(XpError::Validation(
                "subject identity is required".to_string(),
            ));
        }
        if self.context_id.trim().is_empty() {
            return Err(XpError::Validation("context id is required".to_string()));
        }
        if self.claimed_amount == 0 {
            return Err(XpError::Validation(
                "claimed amount must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_artifact(seed: u8) -> ProofArtifact {
        ProofArtifact {
            nullifier: Bytes32::from_bytes([seed; 32]),
            commitment: Bytes32::from_bytes([seed.wrapping_add(1); 32]),
            proof: std::array::from_fn(|i| Bytes32::from_bytes([seed.wrapping_add(i as u8 + 2); 32])),
            claimed_amount: 65,
            threshold: 50,
        }
    }

    #[test]
    fn test_bytes32_parse() {
        let valid = format!("0x{}", "ab".repeat(32));
        assert!(Bytes32::parse(&valid).is_ok());

        assert!(Bytes32::parse(&"ab".repeat(32)).is_err());
        assert!(Bytes32::parse("0x1234").is_err());
        assert!(Bytes32::parse(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn test_bytes32_bytes() {
        let value = Bytes32::from_bytes([7u8; 32]);
        assert_eq!(value.to_bytes(), [7u8; 32]);
        assert_eq!(value.as_str().len(), 66);
    }

    #[test]
    fn test_artifact_from_json() {
        let artifact = sample_artifact(1);
        let body = serde_json::to_string(&artifact).unwrap();
        assert!(body.contains("claimedAmount"));

        let parsed = ProofArtifact::from_json(&body).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_artifact_wrong_proof_length() {
        let mut value = serde_json::to_value(sample_artifact(1)).unwrap();
        value["proof"].as_array_mut().unwrap().pop();

        let err = ProofArtifact::from_json(&value.to_string()).unwrap_err();
        match err {
            XpError::MalformedResponse(msg) => assert!(msg.contains("exactly 8")),
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_artifact_non_numeric_amount() {
        let mut value = serde_json::to_value(sample_artifact(1)).unwrap();
        value["claimedAmount"] = serde_json::json!("sixty-five");

        let err = ProofArtifact::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, XpError::MalformedResponse(_)));
    }

    #[test]
    fn test_artifact_bad_nullifier() {
        let mut value = serde_json::to_value(sample_artifact(1)).unwrap();
        value["nullifier"] = serde_json::json!(42);

        let err = ProofArtifact::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, XpError::MalformedResponse(_)));
    }

    #[test]
    fn test_request_validation() {
        assert!(ProofRequest::new("0xPlayer1", 65, "run-42").validate().is_ok());
        assert!(ProofRequest::new("", 65, "run-42").validate().is_err());
        assert!(ProofRequest::new("0xPlayer1", 0, "run-42").validate().is_err());
        assert!(ProofRequest::new("0xPlayer1", 65, "  ").validate().is_err());
    }
}
