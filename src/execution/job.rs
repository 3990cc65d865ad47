//! Jobs - the units of work a step fans out into

use crate::core::manifest::is_non_empty_file;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Resources requested from the backend for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cores: usize,

    /// Wall-time ceiling in minutes, used for queue job scripts
    pub walltime_min: u64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cores: 1,
            walltime_min: 60,
        }
    }
}

/// Submission descriptor of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,

    /// Directory the job runs in
    pub workdir: PathBuf,

    pub resources: ResourceRequest,
}

impl JobSpec {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            workdir: workdir.into(),
            resources: ResourceRequest::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = resources;
        self
    }

    /// Shell command line for job scripts, every word single-quoted
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Submitted,
    Running,
    Done,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work with one expected output file
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique name within the step, also used for script and log files
    pub name: String,

    pub spec: JobSpec,

    /// File the job must produce; `done` implies it exists and is non-empty
    pub expected_output: PathBuf,

    /// Side files the job may write, such as a score file
    pub side_outputs: Vec<PathBuf>,

    pub status: JobStatus,

    /// Backend handle of the current submission
    pub handle: Option<String>,

    /// Number of submissions so far
    pub submissions: u32,

    /// Last raw status text reported by the backend
    pub backend_status: Option<String>,

    pub exit_code: Option<i32>,

    /// Why the job did not finish, if it did not
    pub error: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, spec: JobSpec, expected_output: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            spec,
            expected_output: expected_output.into(),
            side_outputs: Vec::new(),
            status: JobStatus::Pending,
            handle: None,
            submissions: 0,
            backend_status: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn with_side_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.side_outputs.push(path.into());
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.spec.workdir
    }

    /// File capturing the job's standard output
    pub fn stdout_path(&self) -> PathBuf {
        self.spec.workdir.join(format!("{}.out", self.name))
    }

    /// File capturing the job's standard error
    pub fn stderr_path(&self) -> PathBuf {
        self.spec.workdir.join(format!("{}.err", self.name))
    }

    /// Job script written for queue backends
    pub fn script_path(&self) -> PathBuf {
        self.spec.workdir.join(format!("{}.job", self.name))
    }

    pub fn output_ready(&self) -> bool {
        is_non_empty_file(&self.expected_output)
    }

    /// Remove whatever an earlier submission or run left at the output paths
    pub fn clear_outputs(&self) -> std::io::Result<()> {
        for path in std::iter::once(&self.expected_output).chain(&self.side_outputs) {
            match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reset for another submission
    pub(crate) fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.handle = None;
        self.backend_status = None;
        self.exit_code = None;
    }
}

/// Per-job status query bookkeeping
///
/// `attempts` counts consecutive failed queries; it resets on every
/// successful poll. Backoff doubles the poll interval per failed attempt,
/// capped at 32 intervals.
#[derive(Debug, Clone, Copy)]
pub struct PollState {
    pub attempts: u32,
    pub next_poll_at: Instant,
}

impl PollState {
    pub fn new(now: Instant) -> Self {
        Self {
            attempts: 0,
            next_poll_at: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_poll_at
    }

    /// Record a successful query
    pub fn succeeded(&mut self, now: Instant, interval: Duration) {
        self.attempts = 0;
        self.next_poll_at = now + interval;
    }

    /// Record a failed query and schedule the next one
    pub fn failed(&mut self, now: Instant, interval: Duration) {
        self.attempts += 1;
        self.next_poll_at = now + Self::backoff(interval, self.attempts);
    }

    pub fn backoff(interval: Duration, attempts: u32) -> Duration {
        interval * 2u32.pow(attempts.min(5))
    }
}

/// Quote a word for POSIX shells
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
