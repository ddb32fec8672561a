//! Metrics facade for the pipeline.
//!
//! All metric names live in one enum so call sites cannot drift from the
//! catalog, and recording goes through small per-area helper functions.

use std::fmt;
use std::time::Instant;

use once_cell::sync::Lazy;

/// Every metric the pipeline emits, with Prometheus-style names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pipeline lifecycle
    PipelineRunsStarted,
    PipelineRunsCompleted,
    PipelineRunsFailed,
    PipelinePhaseDuration,

    // Tier processing
    TierRecordsCreated,
    TierValidationFailures,
    TierQualityScore,
    TierProcessingDuration,

    // Embedding pipeline
    EmbeddingDocumentsConverted,
    EmbeddingConversionFailures,
    EmbeddingNodesEmbedded,
    EmbeddingNodesFailed,
    EmbeddingBatchDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PipelineRunsStarted => "propflow_pipeline_runs_started_total",
            MetricName::PipelineRunsCompleted => "propflow_pipeline_runs_completed_total",
            MetricName::PipelineRunsFailed => "propflow_pipeline_runs_failed_total",
            MetricName::PipelinePhaseDuration => "propflow_pipeline_phase_duration_seconds",
            MetricName::TierRecordsCreated => "propflow_tier_records_created_total",
            MetricName::TierValidationFailures => "propflow_tier_validation_failures_total",
            MetricName::TierQualityScore => "propflow_tier_quality_score",
            MetricName::TierProcessingDuration => "propflow_tier_processing_duration_seconds",
            MetricName::EmbeddingDocumentsConverted => "propflow_embedding_documents_converted_total",
            MetricName::EmbeddingConversionFailures => "propflow_embedding_conversion_failures_total",
            MetricName::EmbeddingNodesEmbedded => "propflow_embedding_nodes_embedded_total",
            MetricName::EmbeddingNodesFailed => "propflow_embedding_nodes_failed_total",
            MetricName::EmbeddingBatchDuration => "propflow_embedding_batch_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    ::metrics::describe_counter!(
        MetricName::PipelineRunsStarted.as_str(),
        "Pipeline runs started"
    );
    ::metrics::describe_counter!(
        MetricName::PipelineRunsCompleted.as_str(),
        "Pipeline runs reaching Completed"
    );
    ::metrics::describe_counter!(
        MetricName::PipelineRunsFailed.as_str(),
        "Pipeline runs marked Failed"
    );
    ::metrics::describe_histogram!(
        MetricName::PipelinePhaseDuration.as_str(),
        "Wall time per pipeline phase"
    );
    ::metrics::describe_counter!(
        MetricName::TierRecordsCreated.as_str(),
        "Records written by tier transformations"
    );
    ::metrics::describe_histogram!(
        MetricName::TierQualityScore.as_str(),
        "Output quality score per tier run"
    );
    ::metrics::describe_counter!(
        MetricName::EmbeddingNodesEmbedded.as_str(),
        "Text nodes that received an embedding"
    );
    ::metrics::describe_counter!(
        MetricName::EmbeddingNodesFailed.as_str(),
        "Text nodes flagged with an embedding error"
    );
});

fn ensure_described() {
    Lazy::force(&DESCRIBED);
}

/// RAII timer recording into a histogram on drop.
pub struct TimingGuard {
    start: Instant,
    name: MetricName,
    label: (&'static str, &'static str),
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let secs = self.start.elapsed().as_secs_f64();
        ::metrics::histogram!(self.name.as_str(), self.label.0 => self.label.1).record(secs);
    }
}

pub mod pipeline {
    use super::*;

    pub fn run_started() {
        ensure_described();
        ::metrics::counter!(MetricName::PipelineRunsStarted.as_str()).increment(1);
    }

    pub fn run_completed() {
        ::metrics::counter!(MetricName::PipelineRunsCompleted.as_str()).increment(1);
    }

    pub fn run_failed(phase: &'static str) {
        ::metrics::counter!(MetricName::PipelineRunsFailed.as_str(), "phase" => phase).increment(1);
    }

    pub fn phase_timer(phase: &'static str) -> TimingGuard {
        ensure_described();
        TimingGuard {
            start: Instant::now(),
            name: MetricName::PipelinePhaseDuration,
            label: ("phase", phase),
        }
    }
}

pub mod tier {
    use super::*;
    use crate::rules::TierKind;

    pub fn processing_timer(kind: TierKind) -> TimingGuard {
        ensure_described();
        TimingGuard {
            start: Instant::now(),
            name: MetricName::TierProcessingDuration,
            label: ("stage", kind.stage_name()),
        }
    }

    pub fn records_created(kind: TierKind, count: u64) {
        ::metrics::counter!(
            MetricName::TierRecordsCreated.as_str(),
            "stage" => kind.stage_name()
        )
        .increment(count);
    }

    pub fn validation_failure(kind: TierKind) {
        ::metrics::counter!(
            MetricName::TierValidationFailures.as_str(),
            "stage" => kind.stage_name()
        )
        .increment(1);
    }

    pub fn quality_score(kind: TierKind, score: f64) {
        ::metrics::histogram!(
            MetricName::TierQualityScore.as_str(),
            "stage" => kind.stage_name()
        )
        .record(score);
    }
}

pub mod embedding {
    use super::*;

    pub fn documents_converted(count: u64) {
        ensure_described();
        ::metrics::counter!(MetricName::EmbeddingDocumentsConverted.as_str()).increment(count);
    }

    pub fn conversion_failures(count: u64) {
        ::metrics::counter!(MetricName::EmbeddingConversionFailures.as_str()).increment(count);
    }

    pub fn nodes_embedded(count: u64) {
        ::metrics::counter!(MetricName::EmbeddingNodesEmbedded.as_str()).increment(count);
    }

    pub fn nodes_failed(count: u64) {
        ::metrics::counter!(MetricName::EmbeddingNodesFailed.as_str()).increment(count);
    }

    pub fn batch_timer() -> TimingGuard {
        ensure_described();
        TimingGuard {
            start: Instant::now(),
            name: MetricName::EmbeddingBatchDuration,
            label: ("provider", "default"),
        }
    }
}
