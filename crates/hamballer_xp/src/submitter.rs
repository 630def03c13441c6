//! On-chain verification submission
//!
//! Checks a proof's nullifier, submits the proof to the verifier contract,
//! waits for the receipt and reports the transaction hash. Chain access goes
//! through the [`VerifierContract`] trait; this crate does not ship a chain
//! client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::artifact::{Bytes32, ProofArtifact};
use crate::error::{Result, XpError};

/// Hash of a submitted transaction.
pub type TxHash = Bytes32;

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// Hash of the transaction
    pub transaction_hash: TxHash,
    /// `false` when the transaction reverted
    pub status: bool,
    /// Block the transaction was included in
    pub block_number: Option<u64>,
}

/// On-chain verification status for a player and nullifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Whether the proof was verified
    pub verified: bool,
    /// Verification time in seconds since the Unix epoch (0 if never)
    pub timestamp: u64,
}

/// The XP verifier contract
///
/// Errors are plain descriptions; the submitter decides how each one
/// surfaces.
#[async_trait]
pub trait VerifierContract: Send + Sync {
    /// Whether `nullifier` has already been consumed
    async fn is_nullifier_used(&self, nullifier: &Bytes32) -> std::result::Result<bool, String>;

    /// `(verified, timestamp)` for a player and nullifier
    async fn get_verification_result(
        &self,
        subject_identity: &str,
        nullifier: &Bytes32,
    ) -> std::result::Result<(bool, u64), String>;

    /// Send the verification transaction
    async fn verify_xp_proof(&self, artifact: &ProofArtifact) -> std::result::Result<TxHash, String>;

    /// Wait until `tx` is mined
    async fn wait_for_receipt(&self, tx: &TxHash) -> std::result::Result<TxReceipt, String>;
}

/// Configuration for submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// Longest time to wait for a receipt
    pub receipt_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(120),
        }
    }
}

/// Submits proofs to a [`VerifierContract`]
#[derive(Debug, Clone, Default)]
pub struct VerificationSubmitter {
    config: SubmitterConfig,
}

impl VerificationSubmitter {
    /// Create a submitter with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a submitter with custom configuration
    pub fn with_config(config: SubmitterConfig) -> Self {
        Self { config }
    }

    /// Whether the nullifier has been used.
    ///
    /// A failed read is logged and reported as `false`, so an unreachable
    /// chain never blocks a submission at this step; the contract itself
    /// still rejects a reused nullifier.
    pub async fn is_nullifier_used(&self, contract: &dyn VerifierContract, nullifier: &Bytes32) -> bool {
        match contract.is_nullifier_used(nullifier).await {
            Ok(used) => used,
            Err(e) => {
                warn!(nullifier = %nullifier, error = %e, "nullifier check failed, assuming unused");
                false
            }
        }
    }

    /// Submit a proof and wait for it to be mined.
    ///
    /// Nothing is written when the nullifier is already used. Failures are
    /// not retried.
    pub async fn submit(&self, contract: &dyn VerifierContract, artifact: &ProofArtifact) -> Result<TxHash> {
        artifact.validate()?;

        if self.is_nullifier_used(contract, &artifact.nullifier).await {
            return Err(XpError::NullifierReused(artifact.nullifier.to_string()));
        }

        let tx = contract
            .verify_xp_proof(artifact)
            .await
            .map_err(|e| XpError::Submission(format!("failed to send verification: {}", e)))?;
        info!(tx = %tx, nullifier = %artifact.nullifier, "verification submitted");

        let receipt = tokio::time::timeout(self.config.receipt_timeout, contract.wait_for_receipt(&tx))
            .await
            .map_err(|_| {
                XpError::Submission(format!(
                    "timed out after {:?} waiting for receipt of {}",
                    self.config.receipt_timeout, tx
                ))
            })?
            .map_err(|e| XpError::Submission(format!("failed to get receipt for {}: {}", tx, e)))?;

        if !receipt.status {
            warn!(tx = %tx, "verification transaction reverted");
            return Err(XpError::Submission(format!("transaction {} reverted", tx)));
        }

        info!(tx = %tx, block = ?receipt.block_number, "verification confirmed");
        Ok(receipt.transaction_hash)
    }

    /// On-chain verification status, or `None` if it cannot be read
    pub async fn get_verification_result(
        &self,
        contract: &dyn VerifierContract,
        subject_identity: &str,
        nullifier: &Bytes32,
    ) -> Option<VerificationRecord> {
        match contract.get_verification_result(subject_identity, nullifier).await {
            Ok((verified, timestamp)) => Some(VerificationRecord { verified, timestamp }),
            Err(e) => {
                warn!(subject = %subject_identity, error = %e, "failed to read verification result");
                None
            }
        }
    }
}
