//! Remote proof generators.
//!
//! The generator is an external service. [`ProofGenerator`] is the seam the
//! coordinator talks to; [`HttpProofGenerator`] is the production
//! implementation over `reqwest`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{ProofArtifact, ProofRequest};
use crate::error::XpError;

/// Body sent to the generator for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub subject_identity: String,
    pub claimed_amount: u64,
    pub context_id: String,
    /// Milliseconds since the Unix epoch at send time.
    pub request_timestamp: i64,
}

impl GenerationRequest {
    /// Stamp a request with the current time.
    pub fn for_request(request: &ProofRequest) -> Self {
        Self {
            subject_identity: request.subject_identity.clone(),
            claimed_amount: request.claimed_amount,
            context_id: request.context_id.clone(),
            request_timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Raw answer from a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, unparsed.
    pub body: String,
}

impl GeneratorResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that turns a [`GenerationRequest`] into a response.
///
/// Transport failures are returned as `Err` with a description; any answer
/// from the service, successful or not, is `Ok`.
#[async_trait]
pub trait ProofGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratorResponse, String>;
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Transport error or non-2xx answer.
    Rejected(String),
    /// 2xx answer whose body is not a proof artifact.
    Malformed(String),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Rejected(msg) => f.write_str(msg),
            AttemptFailure::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl AttemptFailure {
    /// Surface the last failure, once attempts are used up, as a pipeline error.
    pub fn into_error(self, attempts: u32) -> XpError {
        match self {
            AttemptFailure::Rejected(message) => XpError::Generation { attempts, message },
            AttemptFailure::Malformed(message) => XpError::MalformedResponse(message),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Turn a generator answer into an artifact or an attempt failure.
pub fn interpret_response(response: GeneratorResponse) -> Result<ProofArtifact, AttemptFailure> {
    if !response.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&response.body)
            .ok()
            .and_then(|body| body.error)
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| {
                format!("Proof generation failed with status {}", response.status)
            });
        return Err(AttemptFailure::Rejected(message));
    }

    ProofArtifact::from_json(&response.body).map_err(|e| match e {
        XpError::MalformedResponse(msg) => AttemptFailure::Malformed(msg),
        other => AttemptFailure::Malformed(other.to_string()),
    })
}

/// Default generator endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3001/api/xp/generate-proof";

/// Configuration for [`HttpProofGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpGeneratorConfig {
    /// Full URL requests are POSTed to.
    pub url: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpGeneratorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            auth_token: None,
            timeout_ms: 30_000,
        }
    }
}

/// Generator backed by an HTTP endpoint.
pub struct HttpProofGenerator {
    config: HttpGeneratorConfig,
    http: reqwest::Client,
}

impl HttpProofGenerator {
    /// Create a new HTTP generator.
    pub fn new(config: HttpGeneratorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Endpoint URL requests go to.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ProofGenerator for HttpProofGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratorResponse, String> {
        let req = self.apply_auth(self.http.post(&self.config.url).json(request));

        let resp = req
            .send()
            .await
            .map_err(|e| format!("Proof request failed: {}", e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Failed to read proof response: {}", e))?;

        Ok(GeneratorResponse { status, body })
    }
}
