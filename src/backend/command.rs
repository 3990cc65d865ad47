//! Runs the queue tools (`sbatch`, `scontrol`, `qsub`, ...) as subprocesses

use crate::backend::BackendError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stdout and stderr joined, for tools that report on either
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Trait for running external commands - allows mocking the queue tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture its output
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, BackendError>;
}

/// Command runner backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    /// Timeout for a single command in seconds
    timeout_secs: u64,
}

impl TokioCommandRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(60)
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, BackendError> {
        debug!("Running {} {}", program, args.join(" "));

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| BackendError::Timeout {
            program: program.to_string(),
            secs: self.timeout_secs,
        })?;

        let output = result.map_err(|source| BackendError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if code != 0 {
            warn!("{} exited with code {}: {}", program, code, stderr.trim());
        }

        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}
