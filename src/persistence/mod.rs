//! Persistence layer for run summaries and run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::state::ExecutionStatus;
use crate::core::{pipeline::Pipeline, state::StepState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Summary file written at the top of every run directory
pub const SUMMARY_FILE: &str = "run.json";

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub ordinal: usize,
    pub key: String,
    pub module: String,

    /// `pending`, `running`, `completed`, `failed` or `skipped`
    pub status: String,

    pub artifacts: usize,
    pub jobs: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Run name
    pub name: String,

    pub run_dir: PathBuf,

    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if finished)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of completed steps
    pub completed_steps: usize,

    /// Total number of steps
    pub total_steps: usize,

    /// Step that stopped the run
    pub failed_step: Option<usize>,

    pub error: Option<String>,

    pub steps: Vec<StepSummary>,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }

    /// Write the summary into a run directory
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = run_dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Read the summary of a run directory
    pub fn read(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(SUMMARY_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Malformed {}", path.display()))
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs with a given name, newest first
    async fn list_runs(&self, name: &str) -> Result<Vec<RunSummary>>;

    /// List all run names
    async fn list_names(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs.values().filter(|r| r.name == name).cloned().collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a pipeline
pub fn create_summary(pipeline: &Pipeline) -> RunSummary {
    let steps = pipeline
        .steps
        .iter()
        .map(|step| {
            let (status, artifacts, jobs, error) = match &step.state {
                StepState::Pending => ("pending", 0, 0, None),
                StepState::Running { .. } => ("running", 0, 0, None),
                StepState::Completed {
                    artifacts, jobs, ..
                } => ("completed", *artifacts, *jobs, None),
                StepState::Failed { error, .. } => ("failed", 0, 0, Some(error.clone())),
                StepState::Skipped { reason } => ("skipped", 0, 0, Some(reason.clone())),
            };
            StepSummary {
                ordinal: step.ordinal,
                key: step.key.clone(),
                module: step.module.clone(),
                status: status.to_string(),
                artifacts,
                jobs,
                error,
            }
        })
        .collect();

    RunSummary {
        run_id: pipeline.state.run_id,
        name: pipeline.name.clone(),
        run_dir: pipeline.run_dir().to_path_buf(),
        status: pipeline.state.status,
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        completed_steps: pipeline.state.completed_steps,
        total_steps: pipeline.state.total_steps,
        failed_step: pipeline.state.failed_step,
        error: pipeline.state.error.clone(),
        steps,
    }
}
