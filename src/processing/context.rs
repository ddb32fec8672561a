//! Processing context and result types shared by every tier processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{EntityType, Tier};

/// Read-only binding for one phase invocation: which entity moves from
/// which table to which, under what limits and toggles.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub entity_type: EntityType,
    pub source_tier: Tier,
    pub source_table: String,
    pub target_tier: Tier,
    pub target_table: String,
    pub stage: String,
    pub batch_id: String,
    pub record_limit: Option<usize>,
    pub validate: bool,
    pub enrich: bool,
}

impl ProcessingContext {
    pub fn new(
        entity_type: EntityType,
        source_tier: Tier,
        source_table: impl Into<String>,
        target_tier: Tier,
        target_table: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            source_tier,
            source_table: source_table.into(),
            target_tier,
            target_table: target_table.into(),
            stage: stage.into(),
            batch_id: format!("batch_{}", uuid::Uuid::new_v4().simple()),
            record_limit: None,
            validate: true,
            enrich: true,
        }
    }

    pub fn with_record_limit(mut self, limit: Option<usize>) -> Self {
        self.record_limit = limit;
        self
    }
}

/// Stage machine for one processor invocation. Strictly forward; kept on
/// the result for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStage {
    NotStarted,
    InputValidated,
    TransformationApplied,
    OutputValidated,
    Succeeded,
    Failed,
}

/// Outcome of one tier processor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub stage: InvocationStage,
    pub records_processed: u64,
    pub records_created: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Fraction of output records passing the tier validity predicate, in [0, 1].
    pub data_quality_score: f64,
    /// Mean required-field coverage across output records, in [0, 1].
    pub completeness_score: f64,
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub error_message: Option<String>,
}

impl ProcessingResult {
    pub fn started() -> Self {
        let now = Utc::now();
        Self {
            success: false,
            stage: InvocationStage::NotStarted,
            records_processed: 0,
            records_created: 0,
            started_at: now,
            finished_at: now,
            data_quality_score: 0.0,
            completeness_score: 0.0,
            validation_errors: Vec::new(),
            warnings: Vec::new(),
            error_message: None,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0
    }

    /// Records per second; zero when the run took no measurable time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs > 0.0 {
            self.records_processed as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_throughput() {
        let mut r = ProcessingResult::started();
        r.records_processed = 100;
        r.finished_at = r.started_at + Duration::seconds(4);
        assert_eq!(r.throughput(), 25.0);
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        let mut r = ProcessingResult::started();
        r.records_processed = 100;
        r.finished_at = r.started_at;
        assert_eq!(r.throughput(), 0.0);
    }
}
