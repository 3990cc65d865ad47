//! Run-level error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can stop a pipeline run
///
/// Configuration and manifest errors are fatal and never retried.
/// Backend query errors are retried inside the scheduler and only surface
/// here once a job has been escalated to failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Syntax error on line {line}: {message}")]
    ConfigSyntax { line: usize, message: String },

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    #[error("Unknown parameter '{parameter}' for module '{module}'")]
    UnknownParameter { module: String, parameter: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Step {ordinal} ({module}): output manifest of the previous step not found at {}", path.display())]
    ManifestMissing {
        ordinal: usize,
        module: String,
        path: PathBuf,
    },

    #[error("Step {ordinal} ({module}): {} job(s) failed, missing outputs: {}", missing.len(), render_paths(missing))]
    JobFailed {
        ordinal: usize,
        module: String,
        missing: Vec<PathBuf>,
    },

    #[error("Step {ordinal} ({module}): {} job(s) timed out, missing outputs: {}", missing.len(), render_paths(missing))]
    JobTimedOut {
        ordinal: usize,
        module: String,
        missing: Vec<PathBuf>,
    },

    #[error("Backend query failed: {0}")]
    BackendQuery(String),

    #[error("Step {ordinal} ({module}) failed: {message}")]
    ModuleFailed {
        ordinal: usize,
        module: String,
        message: String,
    },

    #[error("Run interrupted during step {ordinal} ({module})")]
    Interrupted { ordinal: usize, module: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest {}: {source}", path.display())]
    ManifestFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error originates from the configuration rather than a run
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigSyntax { .. }
                | PipelineError::ConfigMissing(_)
                | PipelineError::UnknownModule(_)
                | PipelineError::UnknownParameter { .. }
                | PipelineError::InvalidValue { .. }
        )
    }

    /// The ordinal of the step the error is attributed to, if any
    pub fn ordinal(&self) -> Option<usize> {
        match self {
            PipelineError::ManifestMissing { ordinal, .. }
            | PipelineError::JobFailed { ordinal, .. }
            | PipelineError::JobTimedOut { ordinal, .. }
            | PipelineError::ModuleFailed { ordinal, .. }
            | PipelineError::Interrupted { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }
}

fn render_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
