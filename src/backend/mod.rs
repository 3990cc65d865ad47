//! Job status backends - where jobs actually run
//!
//! One implementation per substrate: local processes, SLURM and Torque/PBS.
//! The scheduler only talks to the [`JobBackend`] trait.

pub mod command;
pub mod error;
pub mod local;
pub mod queue;
pub mod slurm;
pub mod torque;

use crate::core::config::{ExecutionMode, RunSettings};
use crate::execution::Job;
use async_trait::async_trait;
use std::sync::Arc;

pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use error::BackendError;
pub use local::LocalBackend;
pub use queue::{QueueBackend, QueueDialect};
pub use slurm::{extract_slurm_status, Slurm};
pub use torque::{to_torque_time, Torque};

/// Raw status reported for a job id the queue no longer knows about
///
/// Queues purge finished jobs after a while, so the expected output decides
/// whether such a job succeeded.
pub const PURGED_STATUS: &str = "ERROR";

/// Backend state of a job, normalised across substrates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting for resources
    Pending,
    Running,
    /// No longer running; the expected output decides success
    Completed,
    /// The backend reports an error or no longer knows the job
    Error,
}

impl QueueState {
    pub fn is_finished(&self) -> bool {
        matches!(self, QueueState::Completed | QueueState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "pending",
            QueueState::Running => "running",
            QueueState::Completed => "completed",
            QueueState::Error => "error",
        }
    }
}

/// The backend's view of one submission, valid for one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendJobRecord {
    /// Queue id or local handle
    pub handle: String,

    /// Status text as the backend reported it
    pub raw_status: String,

    pub state: QueueState,

    /// Exit code when the backend exposes one
    pub exit_code: Option<i32>,
}

impl BackendJobRecord {
    pub fn new(handle: impl Into<String>, raw_status: impl Into<String>, state: QueueState) -> Self {
        Self {
            handle: handle.into(),
            raw_status: raw_status.into(),
            state,
            exit_code: None,
        }
    }
}

/// Trait for job backends - allows for different implementations
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Submit a job and return its handle
    async fn submit(&self, job: &Job) -> Result<String, BackendError>;

    /// Query the current state of a submission
    async fn poll(&self, handle: &str) -> Result<BackendJobRecord, BackendError>;

    /// Request cancellation; best-effort
    async fn cancel(&self, handle: &str) -> Result<(), BackendError>;
}

/// Select the backend named by the run settings
pub fn create_backend(settings: &RunSettings) -> Arc<dyn JobBackend> {
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::default());
    match settings.mode {
        ExecutionMode::Local => Arc::new(LocalBackend::new()),
        ExecutionMode::Slurm => Arc::new(QueueBackend::new(
            Slurm,
            runner,
            settings.queue.clone(),
        )),
        ExecutionMode::Torque => Arc::new(QueueBackend::new(
            Torque,
            runner,
            settings.queue.clone(),
        )),
    }
}
