//! stagerun - a modular pipeline runner for local, SLURM and Torque backends

pub mod backend;
pub mod cli;
pub mod core;
pub mod execution;
pub mod modules;
pub mod persistence;

// Re-export commonly used types
pub use backend::{create_backend, JobBackend, LocalBackend, QueueBackend, QueueState};
pub use core::config::{PipelineConfig, RunSettings};
pub use core::{ExecutionStatus, Pipeline, PipelineError, Step, StepState};
pub use execution::{ExecutionEngine, ExecutionEvent, JobScheduler};
pub use modules::{ModuleContext, ModuleRegistry, PipelineModule};
pub use persistence::{PersistenceBackend, RunSummary};
