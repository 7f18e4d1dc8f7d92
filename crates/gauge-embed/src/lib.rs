//! Embedding generation against an external provider.
//!
//! The pipeline owns everything between sanitized text in and a
//! fixed-dimension [`Embedding`] out: chunking oversized input, throttling
//! to the provider's rate limit, retrying transient failures, and averaging
//! chunk vectors back into one. Callers decide whether to persist the
//! result.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gauge_config::{
    DEFAULT_EMBEDDING_ENDPOINT, DEFAULT_EMBEDDING_MODEL, EmbeddingConfig, EmbeddingProviderKind,
    PipelineConfig,
};
use gauge_core::{EMBEDDING_DIMENSION, Embedding, unix_timestamp_secs};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::timeout;

mod chunk;
mod limiter;
mod retry;

pub use chunk::{mean_pool, normalize_unit, split_into_chunks};
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned status {status}")]
    Status { status: u16 },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("provider call timed out after {0:?}")]
    AttemptTimeout(Duration),
}

impl EmbedError {
    /// Transient errors are worth retrying: timeouts, connection resets,
    /// 5xx, and 429. Everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(error) => {
                error.is_timeout()
                    || error.is_connect()
                    || error
                        .status()
                        .is_some_and(|status| status.is_server_error() || status.as_u16() == 429)
            }
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::AttemptTimeout(_) => true,
            Self::InvalidResponse(_) | Self::DimensionMismatch { .. } => false,
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Deterministic hashed bag-of-tokens embedding at the system dimension.
/// Used in tests and as the default provider when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(mock_embedding_for_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: Option<String>, model: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: normalize_optional(endpoint)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_ENDPOINT.to_owned()),
            model: normalize_optional(model).unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned()),
            api_key: normalize_optional(api_key),
        }
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = json!({
            "model": self.model,
            "prompt": text
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Status {
                status: status.as_u16(),
            });
        }

        let response_value: Value = response.json().await?;
        extract_embedding_vector(&response_value)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request_embedding(text).await
    }
}

pub struct LoadedEmbeddingProvider {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub provider_name: String,
    pub model_name: String,
}

pub fn load_embedding_provider(config: &EmbeddingConfig) -> LoadedEmbeddingProvider {
    match config.provider {
        EmbeddingProviderKind::Mock => LoadedEmbeddingProvider {
            provider: Arc::new(MockEmbeddingProvider),
            provider_name: EmbeddingProviderKind::Mock.as_str().to_owned(),
            model_name: format!("mock-{EMBEDDING_DIMENSION}d"),
        },
        EmbeddingProviderKind::Http => {
            let provider = HttpEmbeddingProvider::new(
                config.endpoint.clone(),
                config.model.clone(),
                read_env_non_empty(&config.api_key_env),
            );
            LoadedEmbeddingProvider {
                model_name: provider.model.clone(),
                provider: Arc::new(provider),
                provider_name: EmbeddingProviderKind::Http.as_str().to_owned(),
            }
        }
    }
}

/// Turns sanitized text into one embedding: chunk, throttle, retry, average.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    max_input_chars: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        embeddings: &EmbeddingConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            provider,
            limiter: RateLimiter::per_minute(embeddings.requests_per_minute),
            retry: RetryPolicy {
                max_retries: pipeline.max_retries,
                base_delay: Duration::from_millis(pipeline.backoff_base_ms.max(1)),
                max_delay: Duration::from_secs(2),
            },
            attempt_timeout: Duration::from_secs(pipeline.attempt_timeout_secs.max(1)),
            max_input_chars: embeddings.max_input_chars.max(1),
        }
    }

    pub async fn embed(&self, text: &str, source_id: &str) -> Result<Embedding, EmbedError> {
        let chunks = split_into_chunks(text, self.max_input_chars);

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk_text in &chunks {
            vectors.push(self.embed_chunk(chunk_text).await?);
        }

        // The dimension is a system-wide constant; a provider that returns
        // anything else is rejected rather than stored.
        for vector in &vectors {
            if vector.len() != EMBEDDING_DIMENSION {
                return Err(EmbedError::DimensionMismatch {
                    expected: EMBEDDING_DIMENSION,
                    actual: vector.len(),
                });
            }
        }

        let combined = if vectors.len() == 1 {
            vectors.swap_remove(0)
        } else {
            normalize_unit(mean_pool(&vectors))
        };

        Ok(Embedding::new(combined, source_id, unix_timestamp_secs()))
    }

    async fn embed_chunk(&self, chunk_text: &str) -> Result<Vec<f32>, EmbedError> {
        self.retry
            .run(|| async {
                self.limiter.acquire().await;
                match timeout(self.attempt_timeout, self.provider.embed_text(chunk_text)).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbedError::AttemptTimeout(self.attempt_timeout)),
                }
            })
            .await
    }
}

fn extract_embedding_vector(response: &Value) -> Result<Vec<f32>, EmbedError> {
    if let Some(vector) = value_to_embedding_vector(response) {
        return Ok(vector);
    }

    let candidate_paths = [
        "/embedding",
        "/data/0/embedding",
        "/embeddings/0/embedding",
        "/embeddings/0",
        "/vector",
    ];

    for path in candidate_paths {
        if let Some(value) = response.pointer(path)
            && let Some(vector) = value_to_embedding_vector(value)
        {
            return Ok(vector);
        }
    }

    Err(EmbedError::InvalidResponse(
        "missing embedding vector in provider response body".to_owned(),
    ))
}

fn value_to_embedding_vector(value: &Value) -> Option<Vec<f32>> {
    let values = value.as_array()?;
    if values.is_empty() {
        return None;
    }

    let mut embedding = Vec::with_capacity(values.len());
    for item in values {
        let number = item.as_f64()?;
        if !number.is_finite() {
            return None;
        }
        embedding.push(number as f32);
    }

    Some(embedding)
}

fn mock_embedding_for_text(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; EMBEDDING_DIMENSION];
    let mut saw_token = false;

    for token in tokenize_for_embedding(text) {
        saw_token = true;
        let normalized = token.to_ascii_lowercase();
        let hash = fnv1a_64(normalized.as_bytes());
        let index = (hash as usize) % EMBEDDING_DIMENSION;
        let sign = if ((hash >> 8) & 1) == 0 { 1.0 } else { -1.0 };
        embedding[index] += sign;
    }

    if !saw_token {
        return embedding;
    }

    normalize_unit(embedding)
}

fn tokenize_for_embedding(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FlakyProvider {
        calls: AtomicUsize,
        failures_before_success: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(EmbedError::Status { status: 503 })
            } else {
                Ok(mock_embedding_for_text(text))
            }
        }
    }

    fn pipeline_with(provider: Arc<dyn EmbeddingProvider>, max_input_chars: usize) -> EmbeddingPipeline {
        let embeddings = EmbeddingConfig {
            max_input_chars,
            requests_per_minute: 10_000,
            ..EmbeddingConfig::default()
        };
        let pipeline = PipelineConfig {
            backoff_base_ms: 1,
            ..PipelineConfig::default()
        };
        EmbeddingPipeline::new(provider, &embeddings, &pipeline)
    }

    #[tokio::test]
    async fn mock_embedding_is_deterministic_and_normalized() {
        let provider = MockEmbeddingProvider;

        let first = provider
            .embed_text("Network retry logic with backoff")
            .await
            .expect("first embedding");
        let second = provider
            .embed_text("network RETRY logic with backoff")
            .await
            .expect("second embedding");

        assert_eq!(first.len(), EMBEDDING_DIMENSION);
        assert_eq!(first, second);

        let norm_sq: f32 = first.iter().map(|value| value * value).sum();
        assert!((norm_sq - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embedding_short_text_equals_single_chunk_path() {
        let provider = Arc::new(MockEmbeddingProvider);
        let text = "well under the provider limit";

        let direct = pipeline_with(provider.clone(), 10_000)
            .embed(text, "item-a")
            .await
            .expect("direct embedding");
        let chunked_config = pipeline_with(provider, text.len() + 1)
            .embed(text, "item-a")
            .await
            .expect("single-chunk embedding");

        assert_eq!(direct.vector, chunked_config.vector);
        assert_eq!(direct.dimension, chunked_config.dimension);
    }

    #[tokio::test]
    async fn oversized_text_is_chunked_and_averaged_to_unit_norm() {
        let provider = Arc::new(MockEmbeddingProvider);
        let text = "alpha beta gamma.\n\ndelta epsilon zeta.\n\neta theta iota.";

        let embedding = pipeline_with(provider, 20)
            .embed(text, "item-b")
            .await
            .expect("chunked embedding");

        assert_eq!(embedding.dimension, EMBEDDING_DIMENSION);
        let norm_sq: f32 = embedding.vector.iter().map(|v| v * v).sum();
        assert!((norm_sq - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn transient_provider_failures_are_retried_within_the_call() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            failures_before_success: 2,
        });

        let embedding = pipeline_with(provider.clone(), 10_000)
            .embed("retry me", "item-c")
            .await
            .expect("embedding after retries");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedding.source_id, "item-c");
    }

    #[tokio::test]
    async fn permanent_provider_failure_surfaces_without_retries() {
        struct PermanentFailure(AtomicUsize);

        #[async_trait]
        impl EmbeddingProvider for PermanentFailure {
            async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(EmbedError::Status { status: 422 })
            }
        }

        let provider = Arc::new(PermanentFailure(AtomicUsize::new(0)));
        let result = pipeline_with(provider.clone(), 10_000)
            .embed("fail fast", "item-d")
            .await;

        assert!(matches!(result, Err(EmbedError::Status { status: 422 })));
        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_provider_dimension_is_rejected() {
        struct NarrowProvider;

        #[async_trait]
        impl EmbeddingProvider for NarrowProvider {
            async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
                Ok(vec![1.0, 0.0, 0.0])
            }
        }

        let result = pipeline_with(Arc::new(NarrowProvider), 10_000)
            .embed("any text", "item-e")
            .await;

        assert!(matches!(
            result,
            Err(EmbedError::DimensionMismatch {
                expected: EMBEDDING_DIMENSION,
                actual: 3
            })
        ));
    }

    #[test]
    fn extract_embedding_vector_handles_common_response_shapes() {
        let bare = serde_json::json!([0.1, 0.2, 0.3]);
        assert_eq!(
            extract_embedding_vector(&bare).expect("bare array"),
            vec![0.1f32, 0.2, 0.3]
        );

        let ollama = serde_json::json!({ "embedding": [1.0, 0.0] });
        assert_eq!(
            extract_embedding_vector(&ollama).expect("ollama shape"),
            vec![1.0f32, 0.0]
        );

        let openai = serde_json::json!({ "data": [{ "embedding": [0.5, 0.5] }] });
        assert_eq!(
            extract_embedding_vector(&openai).expect("openai shape"),
            vec![0.5f32, 0.5]
        );

        let junk = serde_json::json!({ "message": "no vector here" });
        assert!(matches!(
            extract_embedding_vector(&junk),
            Err(EmbedError::InvalidResponse(_))
        ));
    }

    #[test]
    fn status_classification_matches_the_retry_taxonomy() {
        assert!(EmbedError::Status { status: 500 }.is_transient());
        assert!(EmbedError::Status { status: 429 }.is_transient());
        assert!(EmbedError::AttemptTimeout(Duration::from_secs(1)).is_transient());
        assert!(!EmbedError::Status { status: 404 }.is_transient());
        assert!(!EmbedError::InvalidResponse("junk".to_owned()).is_transient());
    }
}
