//! # HamBaller XP - Proof Pipeline
//!
//! Client-side pipeline that turns an XP claim into a verified on-chain
//! record.
//!
//! ## Features
//!
//! - **Proof cache**: durable, TTL-bounded storage keyed by a content hash,
//!   with a bounded in-memory layer in front
//! - **Single-flight generation**: one request per proof key no matter how
//!   many callers ask at once
//! - **Retries**: bounded attempts with a fixed delay against the remote
//!   proof service
//! - **Verification submission**: nullifier check, contract write and
//!   receipt wait
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   XpVerificationService                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐      ┌──────────────────────┐     │
//! │  │ ProofRequest-        │      │ Verification-        │     │
//! │  │ Coordinator          │      │ Submitter            │     │
//! │  └──────┬─────────┬─────┘      └──────────┬───────────┘     │
//! │         │         │                       │                 │
//! │  ┌──────▼──────┐ ┌▼──────────────┐ ┌──────▼───────────┐     │
//! │  │ ProofCache- │ │ ProofGenerator│ │ VerifierContract │     │
//! │  │ Store       │ │ (HTTP)        │ │ (chain client)   │     │
//! │  └──────┬──────┘ └───────────────┘ └──────────────────┘     │
//! │         │                                                   │
//! │  ┌──────▼────────────────────────┐                          │
//! │  │  CacheBackend (sled / memory) │                          │
//! │  └───────────────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hamballer_xp::{XpConfig, XpVerificationService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = XpVerificationService::from_config(XpConfig::from_env())?;
//!     let _sweeper = service.spawn_sweeper();
//!
//!     let artifact = service.generate_proof("0xPlayer1", 65, "run-42").await?;
//!     let tx = service.submit(&my_contract, &artifact).await?;
//!     println!("verified in {}", tx);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod service;
pub mod submitter;

pub use artifact::{Bytes32, ProofArtifact, ProofRequest, PROOF_LEN};
pub use cache::{
    compute_key, CacheSnapshot, CacheStats, CacheWriteResult, ProofCacheStore, ProofKey,
};
pub use config::{ConfigError, XpConfig};
pub use coordinator::{
    HttpProofGenerator, ProofGenerator, ProofRequestCoordinator, RetryPolicy,
};
pub use error::{Result, XpError};
pub use service::XpVerificationService;
pub use submitter::{
    TxHash, TxReceipt, VerificationRecord, VerificationSubmitter, VerifierContract,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::artifact::{Bytes32, ProofArtifact, ProofRequest};
    pub use crate::cache::{ProofCacheStore, ProofKey};
    pub use crate::config::XpConfig;
    pub use crate::coordinator::{GenerationRequest, GeneratorResponse, ProofGenerator};
    pub use crate::error::{Result, XpError};
    pub use crate::service::XpVerificationService;
    pub use crate::submitter::{TxHash, TxReceipt, VerifierContract};
}
