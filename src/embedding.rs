//! Embedding provider abstraction and batch orchestration.
//!
//! The [`EmbeddingProvider`] trait is the seam between the pipeline and the
//! embedding capability. [`embed_many`] drives sequential ordered batches
//! through a provider, validating output cardinality for every batch:
//! vectors for batch *k* always precede vectors for batch *k+1*, and the
//! result corresponds 1:1 to the input order.
//!
//! # Retry Strategy (OpenAI provider)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Interface to the embedding capability.
///
/// Implementations must return one vector per input text, in input order,
/// with fixed dimensionality per deployment.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let vectors = embed_many(provider, &[text.to_string()], 1).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("empty embedding response".to_string()))
}

/// Embed `texts` in sequential batches of `batch_size`, preserving global
/// order across batch boundaries.
///
/// # Errors
///
/// [`Error::Provider`] if a batch returns zero vectors for a non-empty
/// request; [`Error::CardinalityMismatch`] if a batch returns a different
/// number of vectors than texts requested.
pub async fn embed_many(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut all_vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

    for (batch_num, batch) in texts.chunks(batch_size).enumerate() {
        let vectors = provider.embed(batch).await?;

        if vectors.is_empty() && !batch.is_empty() {
            return Err(Error::Provider(format!(
                "no embeddings returned for batch {}",
                batch_num
            )));
        }
        if vectors.len() != batch.len() {
            return Err(Error::CardinalityMismatch {
                got: vectors.len(),
                expected: batch.len(),
            });
        }

        tracing::debug!(batch = batch_num, count = vectors.len(), "embedded batch");
        all_vectors.extend(vectors);
    }

    tracing::info!(count = all_vectors.len(), "generated embeddings");
    Ok(all_vectors)
}

// ============ OpenAI Provider ============

/// Embedding provider backed by the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbeddings {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Provider("embedding.model required".to_string()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::Provider("embedding.dims required".to_string()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Provider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Provider("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Provider(e.to_string()))?;
                        return parse_embeddings_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::Provider(format!(
                            "embedding API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::Provider(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Provider(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Provider("embedding failed after retries".to_string())))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Provider("invalid embeddings response: missing data".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Provider("invalid embeddings response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes back one constant vector per input, counting calls.
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![call as f32, i as f32, 0.0])
                .collect())
        }
    }

    /// Always returns one vector too few.
    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[tokio::test]
    async fn batches_preserve_global_order() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };
        let vectors = embed_many(&provider, &texts(5), 2).await.unwrap();
        assert_eq!(vectors.len(), 5);
        // Batch index in component 0, within-batch index in component 1.
        assert_eq!(vectors[0][0], 0.0);
        assert_eq!(vectors[2][0], 1.0);
        assert_eq!(vectors[4][0], 2.0);
        assert_eq!(vectors[3][1], 1.0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cardinality_mismatch_is_fatal() {
        let err = embed_many(&ShortProvider, &texts(3), 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CardinalityMismatch {
                got: 2,
                expected: 3
            }
        ));
    }

    #[tokio::test]
    async fn zero_results_for_nonempty_batch_is_provider_error() {
        let err = embed_many(&ShortProvider, &texts(1), 10).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn embed_one_returns_first_vector() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };
        let v = embed_one(&provider, "a question").await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
