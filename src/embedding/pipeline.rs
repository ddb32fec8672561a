//! End-to-end embedding stage: rows to documents to nodes to vectors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::EntityType;
use crate::domain::Row;
use crate::error::{PipelineError, Result};
use crate::embedding::batch::{BatchConfig, BatchProcessor};
use crate::embedding::chunker::{TextChunker, TextNode};
use crate::embedding::convert::DocumentConverter;
use crate::embedding::provider::EmbeddingClient;
use crate::observability::metrics::embedding as embedding_metrics;

/// Success rate below which the run is flagged as degraded.
const DEGRADED_SUCCESS_RATE: f64 = 0.8;

/// Summary of one embedding run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingReport {
    pub documents_converted: usize,
    pub conversion_failures: usize,
    pub nodes_total: usize,
    pub embeddings_generated: usize,
    pub embedding_failures: usize,
    pub success_rate: f64,
    pub model: String,
    pub degraded: bool,
}

pub struct EmbeddingPipeline {
    converter: DocumentConverter,
    chunker: TextChunker,
    processor: BatchProcessor,
    model: String,
}

impl EmbeddingPipeline {
    pub fn new(
        tier_tag: impl Into<String>,
        chunker: TextChunker,
        client: Arc<dyn EmbeddingClient>,
        batch_config: BatchConfig,
    ) -> Self {
        let model = client.model_name().to_string();
        Self {
            converter: DocumentConverter::new(tier_tag),
            chunker,
            processor: BatchProcessor::new(client, batch_config),
            model,
        }
    }

    /// Runs conversion, chunking and embedding over the final tier rows.
    ///
    /// Partial embedding failures degrade the report but do not error;
    /// producing no documents from non-empty input is structural and
    /// does.
    pub async fn run(
        &self,
        entity: EntityType,
        rows: &[Row],
    ) -> Result<(EmbeddingReport, Vec<TextNode>)> {
        let batch = self.converter.convert_all(entity, rows);
        embedding_metrics::documents_converted(batch.documents.len() as u64);
        embedding_metrics::conversion_failures(batch.failures.len() as u64);
        if batch.documents.is_empty() && !rows.is_empty() {
            return Err(PipelineError::Phase {
                phase: "embeddings".to_string(),
                message: format!(
                    "no documents produced from {} records ({} conversion failures)",
                    rows.len(),
                    batch.failures.len()
                ),
            });
        }

        let mut nodes = Vec::new();
        for document in &batch.documents {
            nodes.extend(self.chunker.chunk_document(document).await);
        }
        let nodes_total = nodes.len();

        let outcome = self.processor.embed_all(nodes).await;
        let success_rate = outcome.success_rate();
        let degraded = success_rate < DEGRADED_SUCCESS_RATE;
        if degraded {
            warn!(
                success_rate = format!("{:.3}", success_rate),
                "embedding run degraded, keeping partial results"
            );
        }
        info!(
            documents = batch.documents.len(),
            nodes = nodes_total,
            embedded = outcome.embedded,
            failed = outcome.failed,
            model = %self.model,
            "embedding stage complete"
        );

        let report = EmbeddingReport {
            documents_converted: batch.documents.len(),
            conversion_failures: batch.failures.len(),
            nodes_total,
            embeddings_generated: outcome.embedded,
            embedding_failures: outcome.failed,
            success_rate,
            model: self.model.clone(),
            degraded,
        };
        Ok((report, outcome.nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::chunker::ChunkingPolicy;
    use crate::embedding::provider::MockEmbeddingClient;
    use serde_json::json;
    use std::time::Duration;

    fn property_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(format!("p{}", i)));
                row.insert("bedrooms".into(), json!(3));
                row.insert("city".into(), json!("Seattle"));
                row.insert("listing_price".into(), json!(500_000.0 + i as f64));
                row
            })
            .collect()
    }

    fn pipeline_with(client: MockEmbeddingClient) -> EmbeddingPipeline {
        EmbeddingPipeline::new(
            "enriched",
            TextChunker::new(ChunkingPolicy::SentenceAware { max_chars: 500 }),
            Arc::new(client),
            BatchConfig {
                batch_size: 2,
                max_workers: 2,
                batch_delay: Duration::from_millis(0),
            },
        )
    }

    #[tokio::test]
    async fn test_full_run_embeds_every_node() {
        let pipeline = pipeline_with(MockEmbeddingClient::new(8));
        let (report, nodes) = pipeline
            .run(EntityType::Property, &property_rows(4))
            .await
            .unwrap();
        assert_eq!(report.documents_converted, 4);
        assert_eq!(report.conversion_failures, 0);
        assert_eq!(report.embeddings_generated, report.nodes_total);
        assert!(!report.degraded);
        assert_eq!(nodes.len(), report.nodes_total);
        assert!(nodes.iter().all(|n| n.is_embedded()));
    }

    #[tokio::test]
    async fn test_low_success_rate_degrades_without_error() {
        let pipeline = pipeline_with(MockEmbeddingClient::new(8).failing_on("Seattle"));
        let (report, nodes) = pipeline
            .run(EntityType::Property, &property_rows(3))
            .await
            .unwrap();
        assert_eq!(report.embeddings_generated, 0);
        assert_eq!(report.embedding_failures, report.nodes_total);
        assert!(report.degraded);
        assert!(nodes.iter().all(|n| n.embedding_error.is_some()));
    }

    #[tokio::test]
    async fn test_no_documents_from_nonempty_input_is_structural_failure() {
        let pipeline = pipeline_with(MockEmbeddingClient::new(8));
        let mut row = Row::new();
        row.insert("bedrooms".into(), json!(2));
        let err = pipeline
            .run(EntityType::Property, &[row])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no documents"));
    }

    #[tokio::test]
    async fn test_empty_input_reports_clean_zero() {
        let pipeline = pipeline_with(MockEmbeddingClient::new(8));
        let (report, nodes) = pipeline.run(EntityType::Property, &[]).await.unwrap();
        assert_eq!(report.documents_converted, 0);
        assert_eq!(report.nodes_total, 0);
        assert!(!report.degraded);
        assert!(nodes.is_empty());
    }
}
