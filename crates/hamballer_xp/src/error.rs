//! Error types for the XP proof pipeline.
//!
//! Two families live here. [`XpError`] is what callers of the pipeline see:
//! validation, generation, malformed responses, nullifier reuse and
//! submission failures. [`CacheError`] is internal to the cache layer and is
//! always downgraded to a soft result before it reaches a caller.

use thiserror::Error;

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, XpError>;

/// The error type surfaced by proof generation and submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XpError {
    /// Malformed input or artifact shape. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The remote proof generator failed on every attempt.
    #[error("Proof generation failed after {attempts} attempt(s): {message}")]
    Generation {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Message of the last failure.
        message: String,
    },

    /// The remote generator answered with a success status but the body did
    /// not match the proof artifact schema, on the last of its attempts.
    #[error("Malformed proof response: {0}")]
    MalformedResponse(String),

    /// The nullifier has already been consumed on-chain.
    #[error("XP proof already verified: nullifier {0} has been used")]
    NullifierReused(String),

    /// The on-chain write or its receipt failed.
    #[error("Submission failed: {0}")]
    Submission(String),
}

impl XpError {
    /// Returns a machine-readable error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            XpError::Validation(_) => "VALIDATION_ERROR",
            XpError::Generation { .. } => "GENERATION_ERROR",
            XpError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            XpError::NullifierReused(_) => "NULLIFIER_REUSED",
            XpError::Submission(_) => "SUBMISSION_ERROR",
        }
    }

    /// Whether the caller may reasonably offer a retry.
    ///
    /// Generation and submission failures are usually transient. Validation
    /// problems, malformed responses and nullifier reuse are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, XpError::Generation { .. } | XpError::Submission(_))
    }
}

/// Errors raised by cache backends and the at-rest codec.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An error originating from the underlying storage engine.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted entry could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An obfuscated field could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for CacheError {
    fn from(err: sled::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XpError::Generation {
            attempts: 3,
            message: "backend unavailable".to_string(),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.to_string().contains("backend unavailable"));

        let err = XpError::NullifierReused("0xabc".to_string());
        assert!(err.to_string().contains("already verified"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(XpError::Generation {
            attempts: 1,
            message: "x".into()
        }
        .is_retryable());
        assert!(XpError::Submission("reverted".into()).is_retryable());
        assert!(!XpError::Validation("bad".into()).is_retryable());
        assert!(!XpError::MalformedResponse("bad".into()).is_retryable());
        assert!(!XpError::NullifierReused("0x".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(XpError::Validation("x".into()).error_code(), "VALIDATION_ERROR");
        assert_eq!(
            XpError::NullifierReused("x".into()).error_code(),
            "NULLIFIER_REUSED"
        );
    }

    #[test]
    fn test_cache_error_from_json() {
        let json_err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err: CacheError = json_err.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
