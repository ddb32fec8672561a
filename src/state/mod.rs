//! Pipeline run state: the lifecycle machine and the persisted snapshot.

pub mod manager;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Tier;

pub use manager::StateManager;

/// Snapshot format version; bump on breaking changes to [`StateSnapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Lifecycle states of one pipeline run. Transitions are strictly forward
/// except `Failed`, reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    LoadingBronze,
    ProcessingSilver,
    ProcessingGold,
    EnrichingGeographic,
    GeneratingEmbeddings,
    WritingOutput,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Position in the forward phase order; terminal states sort last.
    pub fn rank(&self) -> u8 {
        match self {
            PipelineState::Initializing => 0,
            PipelineState::LoadingBronze => 1,
            PipelineState::ProcessingSilver => 2,
            PipelineState::ProcessingGold => 3,
            PipelineState::EnrichingGeographic => 4,
            PipelineState::GeneratingEmbeddings => 5,
            PipelineState::WritingOutput => 6,
            PipelineState::Completed => 7,
            PipelineState::Failed => 8,
            PipelineState::Cancelled => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Initializing => "initializing",
            PipelineState::LoadingBronze => "loading_bronze",
            PipelineState::ProcessingSilver => "processing_silver",
            PipelineState::ProcessingGold => "processing_gold",
            PipelineState::EnrichingGeographic => "enriching_geographic",
            PipelineState::GeneratingEmbeddings => "generating_embeddings",
            PipelineState::WritingOutput => "writing_output",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

/// One persisted record per pipeline run. Fully overwritten on each
/// update; never an append log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_snapshot_version")]
    pub snapshot_version: u32,
    pub pipeline_id: String,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub environment: String,
    pub current_phase: Option<String>,
    pub records_processed: u64,
    pub bronze_table: Option<String>,
    pub silver_table: Option<String>,
    pub gold_table: Option<String>,
    pub enriched_table: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub error_message: Option<String>,
    pub error_phase: Option<String>,
}

fn default_snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

impl StateSnapshot {
    pub fn new(pipeline_id: String, environment: String) -> Self {
        let now = Utc::now();
        Self {
            snapshot_version: SNAPSHOT_VERSION,
            pipeline_id,
            state: PipelineState::Initializing,
            started_at: now,
            updated_at: now,
            environment,
            current_phase: None,
            records_processed: 0,
            bronze_table: None,
            silver_table: None,
            gold_table: None,
            enriched_table: None,
            metrics: BTreeMap::new(),
            error_message: None,
            error_phase: None,
        }
    }

    pub fn table_for(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Bronze => self.bronze_table.as_deref(),
            Tier::Silver => self.silver_table.as_deref(),
            Tier::Gold => self.gold_table.as_deref(),
            Tier::Enriched => self.enriched_table.as_deref(),
        }
    }

    /// Updates lineage for one tier only; other tiers keep accumulating.
    pub fn set_table(&mut self, tier: Tier, name: String) {
        let slot = match tier {
            Tier::Bronze => &mut self.bronze_table,
            Tier::Silver => &mut self.silver_table,
            Tier::Gold => &mut self.gold_table,
            Tier::Enriched => &mut self.enriched_table,
        };
        *slot = Some(name);
    }

    /// Final output table resolution: enriched, then gold, then silver.
    pub fn final_output_table(&self) -> Option<&str> {
        self.enriched_table
            .as_deref()
            .or(self.gold_table.as_deref())
            .or(self.silver_table.as_deref())
    }
}

/// Read-only view of where an interrupted run left off.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPoint {
    pub pipeline_id: String,
    pub state: PipelineState,
    pub last_phase: Option<String>,
    pub records_processed: u64,
    pub bronze_table: Option<String>,
    pub silver_table: Option<String>,
    pub gold_table: Option<String>,
    pub enriched_table: Option<String>,
}

impl From<&StateSnapshot> for RecoveryPoint {
    fn from(snapshot: &StateSnapshot) -> Self {
        Self {
            pipeline_id: snapshot.pipeline_id.clone(),
            state: snapshot.state,
            last_phase: snapshot.current_phase.clone(),
            records_processed: snapshot.records_processed,
            bronze_table: snapshot.bronze_table.clone(),
            silver_table: snapshot.silver_table.clone(),
            gold_table: snapshot.gold_table.clone(),
            enriched_table: snapshot.enriched_table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Completed.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(PipelineState::Cancelled.is_terminal());
        assert!(!PipelineState::ProcessingSilver.is_terminal());
    }

    #[test]
    fn test_final_output_table_priority() {
        let mut s = StateSnapshot::new("run1".into(), "test".into());
        assert_eq!(s.final_output_table(), None);
        s.set_table(Tier::Silver, "property_silver_1".into());
        assert_eq!(s.final_output_table(), Some("property_silver_1"));
        s.set_table(Tier::Gold, "property_gold_2".into());
        assert_eq!(s.final_output_table(), Some("property_gold_2"));
        s.set_table(Tier::Enriched, "property_enriched_3".into());
        assert_eq!(s.final_output_table(), Some("property_enriched_3"));
    }

    #[test]
    fn test_lineage_accumulates() {
        let mut s = StateSnapshot::new("run1".into(), "test".into());
        s.set_table(Tier::Bronze, "property_bronze_1".into());
        s.set_table(Tier::Silver, "property_silver_2".into());
        assert_eq!(s.table_for(Tier::Bronze), Some("property_bronze_1"));
        assert_eq!(s.table_for(Tier::Silver), Some("property_silver_2"));
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let s = StateSnapshot::new("run1".into(), "test".into());
        let json = serde_json::to_string(&s).unwrap();
        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pipeline_id, "run1");
        assert_eq!(back.state, PipelineState::Initializing);
        assert_eq!(back.snapshot_version, SNAPSHOT_VERSION);
    }
}
