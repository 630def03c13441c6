//! The pipeline assembled from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::artifact::{Bytes32, ProofArtifact, ProofRequest};
use crate::cache::{
    CacheBackend, CacheSnapshot, CacheStats, MemoryBackend, ProofCacheStore, ProofKey, SledBackend,
};
use crate::config::{ConfigError, XpConfig};
use crate::coordinator::{HttpProofGenerator, ProofGenerator, ProofRequestCoordinator};
use crate::error::Result;
use crate::submitter::{TxHash, VerificationRecord, VerificationSubmitter, VerifierContract};

/// One proof cache, one coordinator and one submitter
///
/// Build it once per process and share it; there is no global instance.
pub struct XpVerificationService {
    cache: Arc<ProofCacheStore>,
    coordinator: ProofRequestCoordinator,
    submitter: VerificationSubmitter,
    sweep_interval: Duration,
}

impl XpVerificationService {
    /// Build the pipeline with an HTTP generator.
    pub fn from_config(config: XpConfig) -> std::result::Result<Self, ConfigError> {
        let generator = Arc::new(HttpProofGenerator::new(config.generator.clone()));
        Self::with_generator(config, generator)
    }

    /// Build the pipeline around a caller-supplied generator.
    pub fn with_generator(
        config: XpConfig,
        generator: Arc<dyn ProofGenerator>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let backend: Arc<dyn CacheBackend> = match &config.cache.path {
            Some(path) => {
                let backend = SledBackend::open(path)
                    .map_err(|e| ConfigError::CacheUnavailable(e.to_string()))?;
                info!(path = %path.display(), "opened proof cache");
                Arc::new(backend)
            }
            None => Arc::new(MemoryBackend::new()),
        };

        let cache = Arc::new(
            ProofCacheStore::with_capacity(backend, config.cache.memory_capacity)
                .with_default_ttl_hours(config.cache.ttl_hours),
        );
        let coordinator = ProofRequestCoordinator::new(Arc::clone(&cache), generator)
            .with_retry_policy(config.retry);

        Ok(Self {
            cache,
            coordinator,
            submitter: VerificationSubmitter::with_config(config.submitter),
            sweep_interval: config.sweep_interval,
        })
    }

    /// The underlying cache store
    pub fn cache(&self) -> &Arc<ProofCacheStore> {
        &self.cache
    }

    /// Get a proof, from the cache when possible
    pub async fn generate_proof(
        &self,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
    ) -> Result<ProofArtifact> {
        self.coordinator
            .generate_proof(subject_identity, claimed_amount, context_id)
            .await
    }

    /// Get proofs for many requests; failures are left out
    pub async fn batch_generate_proofs(
        &self,
        requests: &[ProofRequest],
    ) -> HashMap<ProofKey, ProofArtifact> {
        self.coordinator.batch_generate_proofs(requests).await
    }

    /// Whether the nullifier has been used; `false` if the chain can't be read
    pub async fn is_nullifier_used(&self, contract: &dyn VerifierContract, nullifier: &Bytes32) -> bool {
        self.submitter.is_nullifier_used(contract, nullifier).await
    }

    /// Submit a proof for on-chain verification
    pub async fn submit(&self, contract: &dyn VerifierContract, artifact: &ProofArtifact) -> Result<TxHash> {
        self.submitter.submit(contract, artifact).await
    }

    /// On-chain verification status
    pub async fn get_verification_result(
        &self,
        contract: &dyn VerifierContract,
        subject_identity: &str,
        nullifier: &Bytes32,
    ) -> Option<VerificationRecord> {
        self.submitter
            .get_verification_result(contract, subject_identity, nullifier)
            .await
    }

    /// Drop every cached proof
    pub async fn clear_cache(&self) -> bool {
        self.cache.clear_all().await
    }

    /// Entry counts and approximate size of the proof cache
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Snapshot of every cached proof; `None` if storage can't be read
    pub async fn export_cached_proofs(&self) -> Option<CacheSnapshot> {
        self.cache.export_all().await
    }

    /// Restore a snapshot, replacing entries under the same keys
    pub async fn import_cached_proofs(&self, snapshot: CacheSnapshot) -> bool {
        self.cache.import_all(snapshot).await
    }

    /// Remove expired proofs every `sweep_interval` until the handle is
    /// aborted.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = cache.sweep_expired().await;
                debug!(removed, "periodic proof cache sweep");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::sample_artifact;
    use crate::coordinator::{GenerationRequest, GeneratorResponse};
    use async_trait::async_trait;

    struct FixedGenerator;

    #[async_trait]
    impl ProofGenerator for FixedGenerator {
        async fn generate(&self, _: &GenerationRequest) -> std::result::Result<GeneratorResponse, String> {
            Ok(GeneratorResponse::new(
                200,
                serde_json::to_string(&sample_artifact(2)).unwrap(),
            ))
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = XpConfig::test_mode().with_endpoint("not a url");
        assert!(XpVerificationService::with_generator(config, Arc::new(FixedGenerator)).is_err());
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let service =
            XpVerificationService::with_generator(XpConfig::test_mode(), Arc::new(FixedGenerator))
                .unwrap();

        service.generate_proof("0xA", 5, "run").await.unwrap();
        assert_eq!(service.cache_stats().await.count, 1);

        let snapshot = service.export_cached_proofs().await.unwrap();
        assert!(service.clear_cache().await);
        assert_eq!(service.cache_stats().await.count, 0);

        assert!(service.import_cached_proofs(snapshot).await);
        assert_eq!(service.cache_stats().await.count, 1);
    }

    #[tokio::test]
    async fn test_sled_cache_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = XpConfig::test_mode().with_cache_path(Some(dir.path().join("cache")));
        let service = XpVerificationService::with_generator(config, Arc::new(FixedGenerator)).unwrap();

        service.generate_proof("0xA", 5, "run").await.unwrap();
        assert!(service.cache().flush());
        assert_eq!(service.cache_stats().await.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired() {
        let config = XpConfig::test_mode().with_sweep_interval(Duration::from_secs(60));
        let service = XpVerificationService::with_generator(config, Arc::new(FixedGenerator)).unwrap();

        service.generate_proof("0xA", 5, "run").await.unwrap();
        let mut snapshot = service.export_cached_proofs().await.unwrap();
        snapshot.entries[0].expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
        service.clear_cache().await;
        // Import does not trigger a sweep, so the stale entry stays until
        // the sweeper runs
        assert!(service.import_cached_proofs(snapshot).await);
        assert_eq!(service.cache_stats().await.count, 1);

        let sweeper = service.spawn_sweeper();
        tokio::time::sleep(Duration::from_secs(61)).await;
        sweeper.abort();

        assert_eq!(service.cache_stats().await.count, 0);
    }
}
