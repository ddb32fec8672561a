//! Run orchestration across the medallion tiers.
//!
//! The orchestrator owns the phase sequence, the state snapshot, and the
//! failure policy. Resume is lineage-driven: a phase is skipped when its
//! tier table is already recorded in the snapshot and still present in
//! the store, so re-running an interrupted pipeline repeats only the
//! work that was lost.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::catalog::{EntityType, TableCatalog, Tier};
use crate::config::PipelineConfig;
use crate::embedding::{
    ChunkingPolicy, EmbeddingClient, EmbeddingPipeline, EmbeddingReport, TextChunker, TextNode,
};
use crate::error::{PipelineError, Result};
use crate::loaders::Loader;
use crate::observability::metrics as obs;
use crate::output::{OutputFile, OutputWriter};
use crate::processing::{ProcessingContext, ProcessingResult, QualityThresholds, TierProcessor};
use crate::rules::TierKind;
use crate::state::{PipelineState, StateManager, StateSnapshot};
use crate::store::TableStore;

/// What one run produced, for callers and the CLI.
#[derive(Debug)]
pub struct PipelineRunSummary {
    pub pipeline_id: String,
    pub records_processed: u64,
    pub final_table: Option<String>,
    pub output_files: Vec<OutputFile>,
    pub embedding_report: Option<EmbeddingReport>,
    pub metrics: Vec<(String, f64)>,
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    store: Arc<dyn TableStore>,
    catalog: TableCatalog,
    state: StateManager,
    loader: Arc<dyn Loader>,
    writer: Arc<dyn OutputWriter>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    entity: EntityType,
    record_limit: Option<usize>,
}

impl PipelineOrchestrator {
    /// Starts a fresh run with its own state snapshot.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn TableStore>,
        loader: Arc<dyn Loader>,
        writer: Arc<dyn OutputWriter>,
        entity: EntityType,
    ) -> Result<Self> {
        let state = StateManager::new(&config.state_dir, &config.environment)?;
        Ok(Self {
            config,
            store,
            catalog: TableCatalog::new(),
            state,
            loader,
            writer,
            embedding_client: None,
            entity,
            record_limit: None,
        })
    }

    /// Adopts an interrupted run's snapshot instead of starting fresh.
    pub fn resume(
        config: PipelineConfig,
        store: Arc<dyn TableStore>,
        loader: Arc<dyn Loader>,
        writer: Arc<dyn OutputWriter>,
        entity: EntityType,
        pipeline_id: &str,
    ) -> Result<Self> {
        let state_dir = std::path::Path::new(&config.state_dir);
        let snapshot = StateManager::load_snapshot(state_dir, pipeline_id)?;
        let placeholder = StateSnapshot::new(
            snapshot.pipeline_id.clone(),
            snapshot.environment.clone(),
        );
        let mut state = StateManager::open(state_dir, placeholder);
        if !state.recover_from(&snapshot) {
            return Err(PipelineError::State(format!(
                "pipeline '{}' finished as '{}' and cannot be resumed",
                pipeline_id,
                snapshot.state.as_str()
            )));
        }
        Ok(Self {
            config,
            store,
            catalog: TableCatalog::new(),
            state,
            loader,
            writer,
            embedding_client: None,
            entity,
            record_limit: None,
        })
    }

    pub fn with_embedding_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.embedding_client = Some(client);
        self
    }

    pub fn with_record_limit(mut self, limit: Option<usize>) -> Self {
        self.record_limit = limit;
        self
    }

    pub fn pipeline_id(&self) -> &str {
        self.state.pipeline_id()
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        self.state.snapshot()
    }

    /// Runs every phase in order, stopping at the first failure. The
    /// snapshot is marked `Failed` before the error surfaces, so the run
    /// is immediately recoverable.
    pub async fn run(&mut self) -> Result<PipelineRunSummary> {
        obs::pipeline::run_started();
        let started = Instant::now();

        self.load_bronze().await?;
        self.run_tier(TierKind::Silver, PipelineState::ProcessingSilver, "silver")
            .await?;
        self.run_tier(TierKind::Gold, PipelineState::ProcessingGold, "gold")
            .await?;

        if self.config.features.enable_geographic_enrichment {
            self.run_tier(
                TierKind::Geographic,
                PipelineState::EnrichingGeographic,
                "geographic",
            )
            .await?;
        } else {
            info!("geographic enrichment disabled, skipping phase");
        }

        let (embedding_report, nodes) = if self.config.features.enable_embeddings {
            self.generate_embeddings().await?
        } else {
            info!("embeddings disabled, skipping phase");
            self.state
                .update_metrics(&[("documents_converted", 0.0), ("embeddings_generated", 0.0)])
                .map_err(|e| self.abort("embeddings", e))?;
            (None, Vec::new())
        };

        let output_files = self.write_output(&nodes).await?;

        let elapsed = started.elapsed().as_secs_f64();
        self.state
            .update_metrics(&[
                ("processing_time", elapsed),
                ("output_files", output_files.len() as f64),
                (
                    "output_size_mb",
                    output_files.iter().map(|f| f.bytes).sum::<u64>() as f64 / (1024.0 * 1024.0),
                ),
            ])
            .map_err(|e| self.abort("output", e))?;
        self.state
            .mark_completed()
            .map_err(|e| self.abort("output", e))?;
        obs::pipeline::run_completed();

        let snapshot = self.state.snapshot();
        info!(
            pipeline_id = %snapshot.pipeline_id,
            records_processed = snapshot.records_processed,
            elapsed = format!("{:.2}s", elapsed),
            "pipeline run completed"
        );
        Ok(PipelineRunSummary {
            pipeline_id: snapshot.pipeline_id.clone(),
            records_processed: snapshot.records_processed,
            final_table: snapshot.final_output_table().map(str::to_string),
            output_files,
            embedding_report,
            metrics: snapshot
                .metrics
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        })
    }

    /// Marks the run failed and hands the error back to the caller.
    fn abort(&mut self, phase: &'static str, err: PipelineError) -> PipelineError {
        if let Err(persist_err) = self.state.mark_failed(&err.to_string(), phase) {
            warn!("could not persist failure state: {}", persist_err);
        }
        obs::pipeline::run_failed(phase);
        err
    }

    /// A tier phase is already done when its table is in the snapshot and
    /// the store still has it.
    async fn phase_is_done(&self, tier: Tier) -> Result<bool> {
        match self.state.snapshot().table_for(tier) {
            Some(table) => self.store.table_exists(table).await,
            None => Ok(false),
        }
    }

    async fn load_bronze(&mut self) -> Result<()> {
        if self
            .phase_is_done(Tier::Bronze)
            .await
            .map_err(|e| self.abort("bronze", e))?
        {
            info!(
                table = self.state.snapshot().bronze_table.as_deref().unwrap_or(""),
                "bronze table already loaded, skipping phase"
            );
            return Ok(());
        }

        self.state
            .update_state(PipelineState::LoadingBronze, Some("bronze"))
            .map_err(|e| self.abort("bronze", e))?;
        let _timer = obs::pipeline::phase_timer("bronze");

        let rows = self
            .loader
            .load(self.entity)
            .await
            .map_err(|e| self.abort("bronze", e))?;
        let rows = match self.record_limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        };
        if rows.is_empty() {
            warn!(source = %self.loader.describe(), "source contains no records");
        }

        let table = self.catalog.mint(self.entity, Tier::Bronze).table_name();
        let count = self
            .store
            .create_table(&table, rows)
            .await
            .map_err(|e| self.abort("bronze", e))?;
        self.state
            .record_phase_outcome(
                Tier::Bronze,
                &table,
                count,
                &[("bronze_records", count as f64)],
            )
            .map_err(|e| self.abort("bronze", e))?;
        info!(table = %table, records = count, "bronze tier loaded");
        Ok(())
    }

    async fn run_tier(
        &mut self,
        kind: TierKind,
        state: PipelineState,
        phase: &'static str,
    ) -> Result<()> {
        let target_tier = kind.target_tier();
        if self
            .phase_is_done(target_tier)
            .await
            .map_err(|e| self.abort(phase, e))?
        {
            info!(
                table = self.state.snapshot().table_for(target_tier).unwrap_or(""),
                phase, "tier table already present, skipping phase"
            );
            return Ok(());
        }

        self.state
            .update_state(state, Some(phase))
            .map_err(|e| self.abort(phase, e))?;
        let _timer = obs::pipeline::phase_timer(phase);

        let source = self
            .resolve_source(kind.source_tier())
            .await
            .map_err(|e| self.abort(phase, e))?;
        let target = self.catalog.mint(self.entity, target_tier).table_name();

        let thresholds = match kind {
            TierKind::Gold => QualityThresholds::for_kind(kind),
            _ => QualityThresholds {
                min_quality: self.config.quality.min_quality,
                min_completeness: self.config.quality.min_completeness,
            },
        };
        let processor = TierProcessor::new(kind, Arc::clone(&self.store))
            .with_thresholds(thresholds)
            .with_geo_reference(self.config.geo.clone());
        let ctx = ProcessingContext::new(
            self.entity,
            kind.source_tier(),
            &source,
            target_tier,
            &target,
            kind.stage_name(),
        )
        .with_record_limit(self.record_limit);

        let result = processor.process(&ctx).await;
        for warning in &result.warnings {
            warn!(phase, "{}", warning);
        }
        if !result.success {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "tier processing failed".to_string());
            return Err(self.abort(
                phase,
                PipelineError::Phase {
                    phase: phase.to_string(),
                    message,
                },
            ));
        }

        if result.records_processed == 0 && result.records_created == 0 {
            // No-op phase: materialize the empty target so downstream
            // phases can still resolve their source.
            self.store
                .create_table(&target, Vec::new())
                .await
                .map_err(|e| self.abort(phase, e))?;
        }

        let entries = self.tier_metric_entries(kind, &result);
        let entry_refs: Vec<(&str, f64)> =
            entries.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        self.state
            .record_phase_outcome(target_tier, &target, result.records_processed, &entry_refs)
            .map_err(|e| self.abort(phase, e))?;
        Ok(())
    }

    fn tier_metric_entries(
        &self,
        kind: TierKind,
        result: &ProcessingResult,
    ) -> Vec<(String, f64)> {
        let mut entries = Vec::new();
        match kind {
            TierKind::Silver => {
                entries.push(("silver_records".to_string(), result.records_created as f64));
                entries.push(("silver_quality".to_string(), result.data_quality_score));
            }
            TierKind::Gold => {
                entries.push(("gold_records".to_string(), result.records_created as f64));
                entries.push(("gold_quality".to_string(), result.data_quality_score));
            }
            TierKind::Geographic => {
                entries.push((
                    "enriched_records".to_string(),
                    result.records_created as f64,
                ));
                entries.push((
                    "enrichment_completeness".to_string(),
                    result.completeness_score,
                ));
            }
        }
        let dropped = result.records_processed.saturating_sub(result.records_created);
        entries.push((
            "records_failed".to_string(),
            self.failed_so_far() + dropped as f64,
        ));
        entries
    }

    /// Running total of dropped/failed records across phases. Survives
    /// resume because it reads the persisted snapshot.
    fn failed_so_far(&self) -> f64 {
        self.state
            .snapshot()
            .metrics
            .get("records_failed")
            .copied()
            .unwrap_or(0.0)
    }

    /// Resolves the input table for a phase: snapshot lineage first, then
    /// the newest matching table name in the store.
    async fn resolve_source(&self, tier: Tier) -> Result<String> {
        if let Some(table) = self.state.snapshot().table_for(tier) {
            if self.store.table_exists(table).await? {
                return Ok(table.to_string());
            }
        }
        let names = self.store.table_names().await?;
        TableCatalog::latest(names.iter().map(String::as_str), self.entity, tier)
            .map(|id| id.table_name())
            .ok_or_else(|| PipelineError::NoSourceData {
                entity: self.entity.as_str().to_string(),
                tier: tier.as_str().to_string(),
            })
    }

    async fn generate_embeddings(
        &mut self,
    ) -> Result<(Option<EmbeddingReport>, Vec<TextNode>)> {
        self.state
            .update_state(PipelineState::GeneratingEmbeddings, Some("embeddings"))
            .map_err(|e| self.abort("embeddings", e))?;
        let _timer = obs::pipeline::phase_timer("embeddings");

        let client = match &self.embedding_client {
            Some(client) => Arc::clone(client),
            None => return Err(self.abort("embeddings", PipelineError::NoEmbeddingProvider)),
        };
        let source = match self.state.snapshot().final_output_table() {
            Some(table) => table.to_string(),
            None => {
                return Err(self.abort(
                    "embeddings",
                    PipelineError::NoSourceData {
                        entity: self.entity.as_str().to_string(),
                        tier: Tier::Gold.as_str().to_string(),
                    },
                ))
            }
        };
        let rows = self
            .store
            .scan(&source, None)
            .await
            .map_err(|e| self.abort("embeddings", e))?;

        let tier_tag = self
            .state
            .snapshot()
            .enriched_table
            .as_ref()
            .map(|_| Tier::Enriched.as_str())
            .unwrap_or(Tier::Gold.as_str());
        let chunker = match &self.config.chunking {
            ChunkingPolicy::Semantic { .. } => {
                TextChunker::new(self.config.chunking.clone()).with_client(Arc::clone(&client))
            }
            policy => TextChunker::new(policy.clone()),
        };
        let pipeline = EmbeddingPipeline::new(
            tier_tag,
            chunker,
            client,
            self.config.embedding.batch_config(),
        );

        let (report, nodes) = pipeline
            .run(self.entity, &rows)
            .await
            .map_err(|e| self.abort("embeddings", e))?;
        let failed = (report.conversion_failures + report.embedding_failures) as f64;
        self.state
            .update_metrics(&[
                ("documents_converted", report.documents_converted as f64),
                ("embeddings_generated", report.embeddings_generated as f64),
                ("embedding_success_rate", report.success_rate),
                ("records_failed", self.failed_so_far() + failed),
            ])
            .map_err(|e| self.abort("embeddings", e))?;
        Ok((Some(report), nodes))
    }

    async fn write_output(&mut self, nodes: &[TextNode]) -> Result<Vec<OutputFile>> {
        self.state
            .update_state(PipelineState::WritingOutput, Some("output"))
            .map_err(|e| self.abort("output", e))?;
        let _timer = obs::pipeline::phase_timer("output");

        let mut files = Vec::new();
        let final_table = self.state.snapshot().final_output_table().map(str::to_string);
        match final_table {
            Some(table) => {
                let rows = self
                    .store
                    .scan(&table, None)
                    .await
                    .map_err(|e| self.abort("output", e))?;
                let file = self
                    .writer
                    .write_rows(&table, &rows)
                    .await
                    .map_err(|e| self.abort("output", e))?;
                files.push(file);
                if !nodes.is_empty() {
                    let file = self
                        .writer
                        .write_nodes(&format!("{}_nodes", table), nodes)
                        .await
                        .map_err(|e| self.abort("output", e))?;
                    files.push(file);
                }
            }
            None => warn!("no final table to write; run produced no tier output"),
        }
        Ok(files)
    }
}
