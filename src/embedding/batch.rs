//! Rate-limited batch embedding.
//!
//! Nodes are embedded in batches with a bounded worker pool and a fixed
//! delay between batch submissions. A failed batch flags only its own
//! nodes; the rest of the run continues. Completed nodes are collected
//! in whatever order workers finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::embedding::chunker::TextNode;
use crate::embedding::provider::EmbeddingClient;
use crate::observability::metrics::embedding as embedding_metrics;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Nodes per provider request.
    pub batch_size: usize,
    /// Concurrent in-flight batches. A value of 1 is strictly
    /// sequential.
    pub max_workers: usize,
    /// Pause between batch submissions.
    pub batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_workers: 4,
            batch_delay: Duration::from_millis(100),
        }
    }
}

/// Result of one embedding run over a set of nodes.
#[derive(Debug)]
pub struct BatchOutcome {
    pub nodes: Vec<TextNode>,
    pub embedded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn success_rate(&self) -> f64 {
        let total = self.embedded + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.embedded as f64 / total as f64
    }
}

pub struct BatchProcessor {
    client: Arc<dyn EmbeddingClient>,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(client: Arc<dyn EmbeddingClient>, config: BatchConfig) -> Self {
        Self { client, config }
    }

    /// Embeds every node, attaching vectors or per-node error flags.
    /// Output order is not guaranteed to match input order.
    pub async fn embed_all(&self, nodes: Vec<TextNode>) -> BatchOutcome {
        if nodes.is_empty() {
            return BatchOutcome {
                nodes,
                embedded: 0,
                failed: 0,
            };
        }

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<TextNode>> = {
            let mut batches = Vec::new();
            let mut iter = nodes.into_iter().peekable();
            while iter.peek().is_some() {
                batches.push(iter.by_ref().take(batch_size).collect());
            }
            batches
        };
        let batch_count = batches.len();

        let done = if self.config.max_workers <= 1 {
            self.run_sequential(batches).await
        } else {
            self.run_concurrent(batches).await
        };

        let embedded = done.iter().filter(|n| n.is_embedded()).count();
        let failed = done.len() - embedded;
        embedding_metrics::nodes_embedded(embedded as u64);
        embedding_metrics::nodes_failed(failed as u64);
        info!(
            batches = batch_count,
            embedded, failed, "embedding run finished"
        );
        BatchOutcome {
            nodes: done,
            embedded,
            failed,
        }
    }

    async fn run_sequential(&self, batches: Vec<Vec<TextNode>>) -> Vec<TextNode> {
        let mut done = Vec::new();
        let total = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            done.extend(embed_batch(Arc::clone(&self.client), batch).await);
            if index + 1 < total {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
        done
    }

    async fn run_concurrent(&self, batches: Vec<Vec<TextNode>>) -> Vec<TextNode> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = JoinSet::new();
        let total = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore lives as long as every worker, so this
                // only fails if it was closed; the batch comes back
                // unembedded and is counted as failed.
                match semaphore.acquire_owned().await {
                    Ok(_permit) => embed_batch(client, batch).await,
                    Err(_) => batch,
                }
            });
            if index + 1 < total {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        let mut done = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(batch) => done.extend(batch),
                // A panicked worker loses only its own batch's nodes
                // from the output; nothing else is affected.
                Err(e) => warn!("embedding worker panicked: {}", e),
            }
        }
        done
    }
}

async fn embed_batch(client: Arc<dyn EmbeddingClient>, mut batch: Vec<TextNode>) -> Vec<TextNode> {
    let _timer = embedding_metrics::batch_timer();
    let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
    let mut results = client.embed_batch(&texts).await.into_iter();
    let model = client.model_name();
    for node in batch.iter_mut() {
        match results.next() {
            Some(Ok(vector)) => node.set_embedding(vector, model),
            Some(Err(reason)) => node.set_embedding_error(reason),
            // The port promises one result per text; a misbehaving
            // provider must not leave the tail silently unflagged.
            None => node.set_embedding_error("provider returned short batch"),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::embedding::convert::Document;
    use crate::embedding::provider::{EmbedResult, MockEmbeddingClient};
    use crate::embedding::{ChunkingPolicy, TextChunker};
    use crate::domain::Row;

    /// Drops the last result from every batch, violating the
    /// one-result-per-text contract.
    struct TruncatingClient;

    #[async_trait]
    impl EmbeddingClient for TruncatingClient {
        fn model_name(&self) -> &str {
            "truncating-v1"
        }

        async fn embed_batch(&self, texts: &[String]) -> Vec<EmbedResult> {
            texts
                .iter()
                .take(texts.len().saturating_sub(1))
                .map(|_| Ok(vec![0.5, -0.5]))
                .collect()
        }
    }

    async fn nodes_for(texts: &[&str]) -> Vec<TextNode> {
        let chunker = TextChunker::new(ChunkingPolicy::None);
        let mut nodes = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let doc = Document {
                id: format!("d{}", i),
                text: text.to_string(),
                metadata: Row::new(),
            };
            nodes.extend(chunker.chunk_document(&doc).await);
        }
        nodes
    }

    #[tokio::test]
    async fn test_all_nodes_embedded_when_provider_healthy() {
        let client = Arc::new(MockEmbeddingClient::new(8));
        let processor = BatchProcessor::new(
            client,
            BatchConfig {
                batch_size: 2,
                max_workers: 3,
                batch_delay: Duration::from_millis(0),
            },
        );
        let nodes = nodes_for(&["one", "two", "three", "four", "five"]).await;
        let outcome = processor.embed_all(nodes).await;
        assert_eq!(outcome.embedded, 5);
        assert_eq!(outcome.failed, 0);
        assert!((outcome.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(outcome.nodes.iter().all(|n| n.is_embedded()));
        assert!(outcome
            .nodes
            .iter()
            .all(|n| n.embedding_model.as_deref() == Some("mock-embedding-v1")));
    }

    #[tokio::test]
    async fn test_partial_failure_flags_only_affected_nodes() {
        let client = Arc::new(MockEmbeddingClient::new(8).failing_on("POISON"));
        let processor = BatchProcessor::new(
            client,
            BatchConfig {
                batch_size: 1,
                max_workers: 4,
                batch_delay: Duration::from_millis(0),
            },
        );
        let nodes = nodes_for(&["good one", "POISON pill", "good two", "good three"]).await;
        let outcome = processor.embed_all(nodes).await;
        assert_eq!(outcome.embedded, 3);
        assert_eq!(outcome.failed, 1);
        assert!((outcome.success_rate() - 0.75).abs() < 1e-9);
        let flagged: Vec<&TextNode> = outcome
            .nodes
            .iter()
            .filter(|n| n.embedding_error.is_some())
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].text.contains("POISON"));
        assert!(flagged[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_short_provider_batch_flags_unmatched_nodes() {
        let processor = BatchProcessor::new(
            Arc::new(TruncatingClient),
            BatchConfig {
                batch_size: 3,
                max_workers: 1,
                batch_delay: Duration::from_millis(0),
            },
        );
        let nodes = nodes_for(&["a", "b", "c"]).await;
        let outcome = processor.embed_all(nodes).await;
        assert_eq!(outcome.embedded, 2);
        assert_eq!(outcome.failed, 1);
        let flagged: Vec<&TextNode> = outcome
            .nodes
            .iter()
            .filter(|n| n.embedding_error.is_some())
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0]
            .embedding_error
            .as_deref()
            .unwrap()
            .contains("short batch"));
        assert!(flagged[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_sequential_mode_preserves_counts() {
        let client = Arc::new(MockEmbeddingClient::new(4));
        let processor = BatchProcessor::new(
            client,
            BatchConfig {
                batch_size: 2,
                max_workers: 1,
                batch_delay: Duration::from_millis(1),
            },
        );
        let nodes = nodes_for(&["a", "b", "c"]).await;
        let outcome = processor.embed_all(nodes).await;
        assert_eq!(outcome.nodes.len(), 3);
        assert_eq!(outcome.embedded, 3);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_clean_noop() {
        let client = Arc::new(MockEmbeddingClient::new(4));
        let processor = BatchProcessor::new(client, BatchConfig::default());
        let outcome = processor.embed_all(Vec::new()).await;
        assert_eq!(outcome.embedded, 0);
        assert_eq!(outcome.failed, 0);
        assert!((outcome.success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
