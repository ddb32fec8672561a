//! Persistent state management for pipeline runs.
//!
//! One JSON file per run under the state directory, fully overwritten on
//! every mutation via write-to-temp-then-rename so a crash can never leave
//! a half-written snapshot behind. The last persisted snapshot is the
//! recovery point.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PipelineState, RecoveryPoint, StateSnapshot};
use crate::catalog::Tier;
use crate::error::{PipelineError, Result};

pub struct StateManager {
    state_dir: PathBuf,
    snapshot: StateSnapshot,
}

impl StateManager {
    /// Starts tracking a fresh run and persists its initial snapshot.
    pub fn new(state_dir: impl Into<PathBuf>, environment: &str) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        let pipeline_id = format!("run_{}", Uuid::new_v4().simple());
        let snapshot = StateSnapshot::new(pipeline_id, environment.to_string());
        let manager = Self {
            state_dir,
            snapshot,
        };
        manager.persist()?;
        info!(pipeline_id = %manager.snapshot.pipeline_id, "initialized pipeline state");
        Ok(manager)
    }

    /// Opens a manager over an existing state directory without creating
    /// a run; used by recovery and inspection commands.
    pub fn open(state_dir: impl Into<PathBuf>, snapshot: StateSnapshot) -> Self {
        Self {
            state_dir: state_dir.into(),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    pub fn pipeline_id(&self) -> &str {
        &self.snapshot.pipeline_id
    }

    fn path_for(dir: &Path, pipeline_id: &str) -> PathBuf {
        dir.join(format!("{}.json", pipeline_id))
    }

    /// Full-overwrite persistence: serialize to a temp file in the same
    /// directory, then rename over the previous snapshot.
    fn persist(&self) -> Result<()> {
        let path = Self::path_for(&self.state_dir, &self.snapshot.pipeline_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&self.snapshot)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        debug!(
            pipeline_id = %self.snapshot.pipeline_id,
            state = self.snapshot.state.as_str(),
            "persisted state snapshot"
        );
        Ok(())
    }

    /// Moves the run to a new lifecycle state and persists.
    pub fn update_state(&mut self, new_state: PipelineState, phase: Option<&str>) -> Result<()> {
        self.snapshot.state = new_state;
        if let Some(phase) = phase {
            self.snapshot.current_phase = Some(phase.to_string());
        }
        self.snapshot.updated_at = Utc::now();
        self.persist()
    }

    /// Records the lineage table for one tier and persists.
    pub fn record_table(&mut self, tier: Tier, name: &str) -> Result<()> {
        self.snapshot.set_table(tier, name.to_string());
        self.snapshot.updated_at = Utc::now();
        self.persist()
    }

    /// Merges metric entries into the snapshot and persists.
    pub fn update_metrics(&mut self, entries: &[(&str, f64)]) -> Result<()> {
        for (key, value) in entries {
            self.snapshot.metrics.insert(key.to_string(), *value);
        }
        self.snapshot.updated_at = Utc::now();
        self.persist()
    }

    /// Records a phase outcome: tier lineage plus metrics in one snapshot
    /// write, so crash recovery sees either both or neither. Every call
    /// materialized a table, so the `tables_created` counter is bumped here.
    pub fn record_phase_outcome(
        &mut self,
        tier: Tier,
        table: &str,
        records_processed: u64,
        entries: &[(&str, f64)],
    ) -> Result<()> {
        self.snapshot.set_table(tier, table.to_string());
        for (key, value) in entries {
            self.snapshot.metrics.insert(key.to_string(), *value);
        }
        *self
            .snapshot
            .metrics
            .entry("tables_created".to_string())
            .or_insert(0.0) += 1.0;
        self.snapshot.records_processed += records_processed;
        self.snapshot.updated_at = Utc::now();
        self.persist()
    }

    /// Marks the run failed with a human-readable message and the phase
    /// that failed, then persists.
    pub fn mark_failed(&mut self, message: &str, phase: &str) -> Result<()> {
        self.snapshot.state = PipelineState::Failed;
        self.snapshot.error_message = Some(message.to_string());
        self.snapshot.error_phase = Some(phase.to_string());
        self.snapshot.updated_at = Utc::now();
        warn!(pipeline_id = %self.snapshot.pipeline_id, phase, "pipeline marked failed: {}", message);
        self.persist()
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.update_state(PipelineState::Completed, None)
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.update_state(PipelineState::Cancelled, None)
    }

    /// Scans persisted snapshots for interrupted runs: anything neither
    /// `Completed` nor `Cancelled`. `Failed` runs are included; the caller
    /// decides whether a retry makes sense.
    pub fn find_recoverable_pipelines(state_dir: &Path) -> Result<Vec<StateSnapshot>> {
        let mut found = Vec::new();
        if !state_dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(state_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let body = match fs::read_to_string(&path) {
                Ok(body) => body,
                Err(e) => {
                    warn!(path = %path.display(), "unreadable state file: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<StateSnapshot>(&body) {
                Ok(snapshot) => {
                    if !matches!(
                        snapshot.state,
                        PipelineState::Completed | PipelineState::Cancelled
                    ) {
                        found.push(snapshot);
                    }
                }
                Err(e) => warn!(path = %path.display(), "unparseable state file: {}", e),
            }
        }
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(found)
    }

    /// Loads a single snapshot by pipeline id.
    pub fn load_snapshot(state_dir: &Path, pipeline_id: &str) -> Result<StateSnapshot> {
        let path = Self::path_for(state_dir, pipeline_id);
        let body = fs::read_to_string(&path)
            .map_err(|e| PipelineError::State(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Adopts an interrupted snapshot as current state. Refuses terminal
    /// snapshots. Calling this twice with the same snapshot yields the
    /// same recovery point both times.
    pub fn recover_from(&mut self, snapshot: &StateSnapshot) -> bool {
        if snapshot.state.is_terminal() && snapshot.state != PipelineState::Failed {
            return false;
        }
        if snapshot.state == PipelineState::Failed {
            // A retried failure resumes from its lineage, not its error.
            let mut adopted = snapshot.clone();
            adopted.error_message = None;
            adopted.error_phase = None;
            self.snapshot = adopted;
        } else {
            self.snapshot = snapshot.clone();
        }
        info!(
            pipeline_id = %self.snapshot.pipeline_id,
            state = self.snapshot.state.as_str(),
            "recovered pipeline state"
        );
        true
    }

    /// The last persisted position of the current run.
    pub fn recovery_point(&self) -> RecoveryPoint {
        RecoveryPoint::from(&self.snapshot)
    }

    /// Deletes `Completed`/`Cancelled` snapshots older than the threshold.
    /// `Failed` snapshots are never deleted automatically; operators
    /// triage those by hand. Returns how many files were removed.
    pub fn cleanup_old_states(state_dir: &Path, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut removed = 0;
        if !state_dir.exists() {
            return Ok(0);
        }
        for entry in fs::read_dir(state_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let Ok(body) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(snapshot) = serde_json::from_str::<StateSnapshot>(&body) else {
                continue;
            };
            let terminal_cleanable = matches!(
                snapshot.state,
                PipelineState::Completed | PipelineState::Cancelled
            );
            if terminal_cleanable && snapshot.updated_at < cutoff {
                fs::remove_file(&path)?;
                removed += 1;
                debug!(pipeline_id = %snapshot.pipeline_id, "removed old state file");
            }
        }
        Ok(removed)
    }
}
