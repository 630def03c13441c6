//! Proof request coordination
//!
//! Cache-first proof production with single-flight deduplication and bounded
//! retries against a remote [`ProofGenerator`]. Transport errors, non-2xx
//! answers and 2xx bodies that are not proof artifacts are all retried; the
//! kind of the last failure decides the error the caller sees.
//!
//! For any key at most one generation is in flight. Concurrent callers for
//! the same key share it and all observe the same outcome. The generation
//! runs in its own task, so a caller that stops waiting does not cancel it:
//! the retries run to completion and a success still lands in the cache.

pub mod generator;
pub mod retry;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub use generator::{
    AttemptFailure, GenerationRequest, GeneratorResponse, HttpGeneratorConfig,
    HttpProofGenerator, ProofGenerator,
};
pub use retry::{RetryExhausted, RetryPolicy};

use crate::artifact::{ProofArtifact, ProofRequest};
use crate::cache::{ProofCacheStore, ProofKey};
use crate::error::{Result, XpError};
use generator::interpret_response;

type InFlight = Shared<BoxFuture<'static, Result<ProofArtifact>>>;
type PendingMap = Arc<Mutex<HashMap<ProofKey, InFlight>>>;

/// Produces proofs, consulting the cache before the network
pub struct ProofRequestCoordinator {
    cache: Arc<ProofCacheStore>,
    generator: Arc<dyn ProofGenerator>,
    retry: RetryPolicy,
    /// Generations in flight. Never held across an await.
    pending: PendingMap,
}

impl ProofRequestCoordinator {
    /// Create a coordinator with the default retry policy
    pub fn new(cache: Arc<ProofCacheStore>, generator: Arc<dyn ProofGenerator>) -> Self {
        Self {
            cache,
            generator,
            retry: RetryPolicy::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The retry policy in use
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Number of generations currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Get a proof for the claim, generating it if it is not cached
    pub async fn generate_proof(
        &self,
        subject_identity: &str,
        claimed_amount: u64,
        context_id: &str,
    ) -> Result<ProofArtifact> {
        self.generate(&ProofRequest::new(subject_identity, claimed_amount, context_id))
            .await
    }

    /// Get a proof for a request, generating it if it is not cached
    pub async fn generate(&self, request: &ProofRequest) -> Result<ProofArtifact> {
        request.validate()?;

        if let Some(artifact) = self
            .cache
            .get(
                &request.subject_identity,
                request.claimed_amount,
                &request.context_id,
            )
            .await
        {
            return Ok(artifact);
        }

        let key = request.key();
        self.pending_or_start(key, request.clone()).await
    }

    /// Produce proofs for many requests
    ///
    /// Cached proofs are served in one batch lookup; the rest are generated
    /// concurrently. A failed request is logged and left out of the result
    /// without affecting the others.
    pub async fn batch_generate_proofs(
        &self,
        requests: &[ProofRequest],
    ) -> HashMap<ProofKey, ProofArtifact> {
        let mut results = self.cache.get_batch(requests).await;

        let mut seen = HashSet::new();
        let misses: Vec<(ProofKey, &ProofRequest)> = requests
            .iter()
            .map(|request| (request.key(), request))
            .filter(|(key, _)| !results.contains_key(key) && seen.insert(key.clone()))
            .collect();

        debug!(
            requested = requests.len(),
            cached = results.len(),
            to_generate = misses.len(),
            "batch proof generation"
        );

        let outcomes = join_all(
            misses
                .into_iter()
                .map(|(key, request)| async move { (key, request, self.generate(request).await) }),
        )
        .await;

        for (key, request, outcome) in outcomes {
            match outcome {
                Ok(artifact) => {
                    results.insert(key, artifact);
                }
                Err(e) => warn!(
                    subject = %request.subject_identity,
                    context = %request.context_id,
                    error = %e,
                    "batch proof generation failed for request"
                ),
            }
        }

        results
    }

    /// Join the in-flight generation for `key`, or start one.
    fn pending_or_start(&self, key: ProofKey, request: ProofRequest) -> InFlight {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = pending.get(&key) {
            debug!(key = %key, "joining in-flight proof generation");
            return existing.clone();
        }

        // The task removes its own entry; holding the lock until the insert
        // below guarantees that removal comes after it.
        let task = tokio::spawn(run_generation(
            Arc::clone(&self.cache),
            Arc::clone(&self.generator),
            self.retry,
            Arc::clone(&self.pending),
            key.clone(),
            request,
        ));

        let attempts = self.retry.attempts();
        let flight = async move {
            task.await.unwrap_or_else(|e| {
                Err(XpError::Generation {
                    attempts,
                    message: format!("proof generation task failed: {}", e),
                })
            })
        }
        .boxed()
        .shared();

        pending.insert(key, flight.clone());
        flight
    }
}

async fn run_generation(
    cache: Arc<ProofCacheStore>,
    generator: Arc<dyn ProofGenerator>,
    retry: RetryPolicy,
    pending: PendingMap,
    key: ProofKey,
    request: ProofRequest,
) -> Result<ProofArtifact> {
    info!(key = %key, "generating proof");

    let generator = generator.as_ref();
    let request_ref = &request;
    let outcome = retry
        .run(move |attempt| async move {
            debug!(attempt, "requesting proof from generator");
            let body = GenerationRequest::for_request(request_ref);
            let response = generator
                .generate(&body)
                .await
                .map_err(AttemptFailure::Rejected)?;
            interpret_response(response)
        })
        .await;

    let result = match outcome {
        Ok(artifact) => {
            let write = cache
                .put(
                    &request.subject_identity,
                    request.claimed_amount,
                    &request.context_id,
                    &artifact,
                )
                .await;
            if !write.success {
                warn!(key = %key, error = ?write.error, "generated proof was not cached");
            }
            info!(key = %key, "proof generated");
            Ok(artifact)
        }
        Err(RetryExhausted {
            attempts,
            last_error,
        }) => {
            warn!(key = %key, attempts, error = %last_error, "proof generation failed");
            Err(last_error.into_error(attempts))
        }
    };

    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::sample_artifact;
    use crate::cache::tests::BrokenBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowGenerator {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ProofGenerator for SlowGenerator {
        async fn generate(&self, _: &GenerationRequest) -> std::result::Result<GeneratorResponse, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(GeneratorResponse::new(
                200,
                serde_json::to_string(&sample_artifact(7)).unwrap(),
            ))
        }
    }

    /// Fails the first `failures` calls and records when each call arrived.
    struct FlakyGenerator {
        failures: usize,
        arrivals: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl ProofGenerator for FlakyGenerator {
        async fn generate(&self, _: &GenerationRequest) -> std::result::Result<GeneratorResponse, String> {
            let call = {
                let mut arrivals = self.arrivals.lock().unwrap();
                arrivals.push(tokio::time::Instant::now());
                arrivals.len()
            };
            if call <= self.failures {
                Err("connection reset".to_string())
            } else {
                Ok(GeneratorResponse::new(
                    200,
                    serde_json::to_string(&sample_artifact(9)).unwrap(),
                ))
            }
        }
    }

    fn coordinator(delay: Duration) -> (ProofRequestCoordinator, Arc<SlowGenerator>) {
        let generator = Arc::new(SlowGenerator {
            calls: AtomicUsize::new(0),
            delay,
        });
        let coordinator = ProofRequestCoordinator::new(
            Arc::new(ProofCacheStore::in_memory()),
            generator.clone(),
        )
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        (coordinator, generator)
    }

    #[tokio::test]
    async fn test_validation_happens_before_network() {
        let (coordinator, generator) = coordinator(Duration::ZERO);

        let err = coordinator.generate_proof("", 10, "run").await.unwrap_err();
        assert!(matches!(err, XpError::Validation(_)));
        let err = coordinator.generate_proof("0xA", 0, "run").await.unwrap_err();
        assert!(matches!(err, XpError::Validation(_)));

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pending_entry_removed_after_settling() {
        let (coordinator, _) = coordinator(Duration::from_millis(20));

        let call = coordinator.generate_proof("0xA", 10, "run");
        tokio::pin!(call);
        tokio::select! {
            _ = &mut call => panic!("generation finished too early"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
        assert_eq!(coordinator.pending_count(), 1);

        call.await.unwrap();
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_caller_still_populates_cache() {
        let (coordinator, generator) = coordinator(Duration::from_millis(20));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(1),
            coordinator.generate_proof("0xA", 10, "run"),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(
            coordinator.cache.get("0xA", 10, "run").await,
            Some(sample_artifact(7))
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_deduplicates_requests() {
        let (coordinator, generator) = coordinator(Duration::from_millis(5));
        let requests = vec![
            ProofRequest::new("0xA", 10, "run"),
            ProofRequest::new("0xA", 10, "run"),
        ];

        let results = coordinator.batch_generate_proofs(&requests).await;
        assert_eq!(results.len(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_spaced_by_retry_delay() {
        let generator = Arc::new(FlakyGenerator {
            failures: 2,
            arrivals: Mutex::new(Vec::new()),
        });
        let coordinator = ProofRequestCoordinator::new(
            Arc::new(ProofCacheStore::in_memory()),
            generator.clone(),
        );
        let delay = coordinator.retry_policy().delay;
        assert_eq!(delay, Duration::from_millis(2000));

        let artifact = coordinator.generate_proof("0xA", 10, "run").await.unwrap();
        assert_eq!(artifact, sample_artifact(9));

        let arrivals = generator.arrivals.lock().unwrap().clone();
        assert_eq!(arrivals.len(), 3);
        for pair in arrivals.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= delay && gap < delay + Duration::from_millis(100),
                "unexpected gap between attempts: {:?}",
                gap
            );
        }
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_proof() {
        let generator = Arc::new(SlowGenerator {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let cache = Arc::new(ProofCacheStore::new(Arc::new(BrokenBackend)));
        let coordinator = ProofRequestCoordinator::new(cache, generator.clone());

        let first = coordinator.generate_proof("0xA", 10, "run").await;
        assert_eq!(first, Ok(sample_artifact(7)));

        // Nothing was cached, so the second call goes back to the generator
        let second = coordinator.generate_proof("0xA", 10, "run").await;
        assert_eq!(second, Ok(sample_artifact(7)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.pending_count(), 0);
    }
}
