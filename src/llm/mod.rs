//! Language-model client for structured field extraction.
//!
//! Supports the Ollama API for local inference. The service is only ever
//! asked for structured JSON output; document-type classification is handled
//! locally by `classify` and never requires a model call.

mod client;

pub use client::{truncate_at_boundary, HttpLlmClient, LlmConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the language-model service.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Service signalled rate limiting; retryable under the backoff policy.
    #[error("rate limited by LLM service")]
    RateLimited,
    /// Call exceeded its deadline; treated as non-retryable.
    #[error("LLM request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Whether the backoff policy should retry this error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited)
    }
}

/// A structured-extraction request.
///
/// The target schema is embedded in the prompt to constrain the response
/// shape; temperature and token ceiling are per-call so the consolidation
/// pass can run tighter than per-document extraction.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Inference service boundary.
///
/// Implementations must return parsed JSON or a distinguishable rate-limit
/// signal; anything else is a terminal error for the current request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn extract_structured(
        &self,
        request: StructuredRequest,
    ) -> Result<serde_json::Value, LlmError>;
}
