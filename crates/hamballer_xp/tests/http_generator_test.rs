//! HTTP proof generator against a local mock proof service

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hamballer_xp::coordinator::HttpGeneratorConfig;
use hamballer_xp::prelude::*;
use hamballer_xp::{HttpProofGenerator, RetryPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockService {
    calls: AtomicUsize,
    /// Requests answered with 503 before the service starts producing proofs
    failures_before_success: usize,
}

fn artifact_json(claimed_amount: u64) -> Value {
    let element = |b: u8| format!("0x{}", hex::encode([b; 32]));
    json!({
        "nullifier": element(0xaa),
        "commitment": element(0xbb),
        "proof": (0..8u8).map(element).collect::<Vec<_>>(),
        "claimedAmount": claimed_amount,
        "threshold": 50,
    })
}

async fn generate_proof(
    State(service): State<Arc<MockService>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = service.calls.fetch_add(1, Ordering::SeqCst);

    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-token") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing token" })));
    }
    if call < service.failures_before_success {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "prover busy" })),
        );
    }
    if body["requestTimestamp"].as_i64().unwrap_or(0) <= 0 {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing timestamp" })));
    }

    let amount = body["claimedAmount"].as_u64().unwrap_or(0);
    (StatusCode::OK, Json(artifact_json(amount)))
}

async fn start_mock(service: Arc<MockService>) -> String {
    let app = Router::new()
        .route("/api/xp/generate-proof", post(generate_proof))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/xp/generate-proof", addr)
}

fn config(url: String) -> XpConfig {
    XpConfig::test_mode()
        .with_endpoint(url)
        .with_auth_token("test-token")
        .with_retry(RetryPolicy::new(3, Duration::from_millis(5)))
}

#[tokio::test]
async fn test_http_generator_round_trip() {
    let mock = Arc::new(MockService::default());
    let url = start_mock(mock.clone()).await;

    let generator = HttpProofGenerator::new(HttpGeneratorConfig {
        url,
        auth_token: Some("test-token".to_string()),
        timeout_ms: 2_000,
    });
    let response = generator
        .generate(&GenerationRequest::for_request(&ProofRequest::new(
            "0xPlayer1", 65, "run-42",
        )))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let artifact = ProofArtifact::from_json(&response.body).unwrap();
    assert_eq!(artifact.claimed_amount, 65);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_service_over_http_with_retries() {
    let mock = Arc::new(MockService {
        failures_before_success: 2,
        ..Default::default()
    });
    let url = start_mock(mock.clone()).await;
    let service = XpVerificationService::from_config(config(url)).unwrap();

    let artifact = service.generate_proof("0xPlayer1", 65, "run-42").await.unwrap();
    assert_eq!(artifact.claimed_amount, 65);
    assert_eq!(artifact.threshold, 50);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 3);

    // Cached now
    service.generate_proof("0xPlayer1", 65, "run-42").await.unwrap();
    assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_error_body_is_surfaced() {
    let mock = Arc::new(MockService::default());
    let url = start_mock(mock.clone()).await;
    let service = XpVerificationService::from_config(
        XpConfig::test_mode()
            .with_endpoint(url)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(5))),
    )
    .unwrap();

    let err = service.generate_proof("0xPlayer1", 65, "run-42").await.unwrap_err();
    assert_eq!(
        err,
        XpError::Generation {
            attempts: 2,
            message: "missing token".to_string()
        }
    );
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = XpVerificationService::from_config(
        XpConfig::test_mode()
            .with_endpoint(format!("http://{}/api/xp/generate-proof", addr))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(5))),
    )
    .unwrap();

    match service.generate_proof("0xPlayer1", 65, "run-42").await {
        Err(XpError::Generation { attempts, message }) => {
            assert_eq!(attempts, 2);
            assert!(message.starts_with("Proof request failed"));
        }
        other => panic!("Expected Generation error, got {:?}", other),
    }
}
