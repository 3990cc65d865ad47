//! Batch queue backend shared by SLURM and Torque
//!
//! Submission writes a job script next to the job's outputs and hands it to
//! the queue's submit tool. Each queue system only differs in its
//! [`QueueDialect`]: tool names, script header and how output is parsed.

use crate::backend::{
    BackendError, BackendJobRecord, CommandOutput, CommandRunner, JobBackend, QueueState,
};
use crate::execution::{job::shell_quote, Job};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Queue-system specific commands and parsing
pub trait QueueDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit tool, called with the script path as its only argument
    fn submit_program(&self) -> &'static str;

    /// Status query for a queue id
    fn status_command(&self, id: &str) -> (&'static str, Vec<String>);

    /// Cancellation for a queue id
    fn cancel_command(&self, id: &str) -> (&'static str, Vec<String>);

    /// Directive block at the top of the job script
    fn script_header(&self, job: &Job, queue: Option<&str>) -> String;

    /// Extract the queue id from the submit tool's stdout
    fn parse_submit(&self, stdout: &str) -> Result<String, BackendError>;

    /// Extract raw and normalised state from the status tool's output
    fn parse_status(&self, text: &str) -> Result<(String, QueueState), BackendError>;
}

/// Job backend for a batch queue
pub struct QueueBackend<D> {
    dialect: D,
    runner: Arc<dyn CommandRunner>,
    queue: Option<String>,
}

impl<D: QueueDialect> QueueBackend<D> {
    pub fn new(dialect: D, runner: Arc<dyn CommandRunner>, queue: Option<String>) -> Self {
        Self {
            dialect,
            runner,
            queue,
        }
    }

    /// Full text of the job script for a job
    pub fn render_script(&self, job: &Job) -> String {
        let mut script = self.dialect.script_header(job, self.queue.as_deref());
        script.push('\n');
        script.push_str(&format!(
            "cd {}\n",
            shell_quote(&job.workdir().to_string_lossy())
        ));
        for (key, value) in &job.spec.env {
            script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        script.push_str(&job.spec.command_line());
        script.push('\n');
        script
    }

    fn check(program: &str, output: &CommandOutput) -> Result<(), BackendError> {
        if output.success() {
            Ok(())
        } else {
            Err(BackendError::CommandFailed {
                program: program.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl<D: QueueDialect> JobBackend for QueueBackend<D> {
    fn name(&self) -> &'static str {
        self.dialect.name()
    }

    async fn submit(&self, job: &Job) -> Result<String, BackendError> {
        let script_path = job.script_path();
        std::fs::write(&script_path, self.render_script(job))
            .map_err(|e| BackendError::io(&script_path, e))?;

        let program = self.dialect.submit_program();
        let output = self
            .runner
            .run(program, &[script_path.to_string_lossy().into_owned()])
            .await?;
        Self::check(program, &output)?;

        let id = self.dialect.parse_submit(&output.stdout)?;
        info!("Submitted {} as {} job {}", job.name, self.dialect.name(), id);
        Ok(id)
    }

    async fn poll(&self, handle: &str) -> Result<BackendJobRecord, BackendError> {
        let (program, args) = self.dialect.status_command(handle);
        let output = self.runner.run(program, &args).await?;

        match self.dialect.parse_status(&output.combined()) {
            Ok((raw, state)) => {
                debug!("{} job {}: {}", self.dialect.name(), handle, raw);
                Ok(BackendJobRecord::new(handle, raw, state))
            }
            Err(e) => {
                Self::check(program, &output)?;
                Err(e)
            }
        }
    }

    async fn cancel(&self, handle: &str) -> Result<(), BackendError> {
        let (program, args) = self.dialect.cancel_command(handle);
        let output = self.runner.run(program, &args).await?;
        Self::check(program, &output)
    }
}
