//! Backend error types

use std::path::PathBuf;
use thiserror::Error;

/// Error types for backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("'{program}' timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    #[error("Malformed backend output: {0}")]
    MalformedOutput(String),

    #[error("Unknown job handle '{0}'")]
    UnknownHandle(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same query may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::CommandFailed { .. }
                | BackendError::Timeout { .. }
                | BackendError::MalformedOutput(_)
                | BackendError::Spawn { .. }
        )
    }
}
