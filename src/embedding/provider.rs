//! Embedding provider clients.
//!
//! The pipeline only ever sees the [`EmbeddingClient`] port: a batch of
//! texts in, one vector-or-error per text out. Transport failures are
//! folded into per-text errors so the batch processor never has to
//! special-case them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Per-text embedding outcome.
pub type EmbedResult = std::result::Result<Vec<f32>, String>;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded on every embedded node.
    fn model_name(&self) -> &str;

    /// Embeds a batch of texts. The result has exactly one entry per
    /// input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbedResult>;
}

/// Client for OpenAI-compatible embedding endpoints.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Config(
                "embedding API key is empty".to_string(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|_| PipelineError::Config("invalid embedding API key".to_string()))?,
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Phase {
                phase: "embeddings".to_string(),
                message: format!("provider returned {}: {}", status, body),
            });
        }
        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(PipelineError::Phase {
                phase: "embeddings".to_string(),
                message: format!(
                    "provider returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbedResult> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request(texts).await {
            Ok(vectors) => vectors.into_iter().map(Ok).collect(),
            Err(e) => {
                // One transport failure fails every node in this batch;
                // other batches are unaffected.
                warn!("embedding batch failed: {}", e);
                texts.iter().map(|_| Err(e.to_string())).collect()
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Deterministic offline client for tests and demos: vectors are derived
/// from a content hash, and texts containing the failure marker get a
/// simulated provider error.
pub struct MockEmbeddingClient {
    dims: usize,
    fail_marker: Option<String>,
}

impl MockEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fail_marker: None,
        }
    }

    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dims)
            .map(|i| {
                let byte = digest[i % digest.len()] as f32;
                (byte / 255.0) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn model_name(&self) -> &str {
        "mock-embedding-v1"
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbedResult> {
        texts
            .iter()
            .map(|text| {
                if let Some(marker) = &self.fail_marker {
                    if text.contains(marker.as_str()) {
                        return Err("simulated provider error".to_string());
                    }
                }
                Ok(self.vector_for(text))
            })
            .collect()
    }
}

/// Cosine similarity between two vectors; zero for mismatched or empty
/// inputs. Used by the semantic chunking policy.
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
