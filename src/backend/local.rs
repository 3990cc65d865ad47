//! Local backend - one worker process per job

use crate::backend::{BackendError, BackendJobRecord, JobBackend, QueueState};
use crate::execution::Job;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct LocalProcess {
    child: Child,
    workdir: PathBuf,
}

/// Runs jobs as child processes of the controller
///
/// Status comes from process liveness only; whether a finished job is
/// `done` is decided by its expected output, not by the exit code.
#[derive(Default)]
pub struct LocalBackend {
    processes: Mutex<HashMap<String, LocalProcess>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes not yet reaped
    pub async fn live_processes(&self) -> usize {
        self.processes.lock().await.len()
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, job: &Job) -> Result<String, BackendError> {
        let spec = &job.spec;
        let stdout_path = job.stdout_path();
        let stderr_path = job.stderr_path();
        let stdout =
            std::fs::File::create(&stdout_path).map_err(|e| BackendError::io(&stdout_path, e))?;
        let stderr =
            std::fs::File::create(&stderr_path).map_err(|e| BackendError::io(&stderr_path, e))?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let handle = Uuid::new_v4().to_string();
        debug!("Started local job {} as {:?} ({})", job.name, child.id(), handle);
        self.processes.lock().await.insert(
            handle.clone(),
            LocalProcess {
                child,
                workdir: spec.workdir.clone(),
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &str) -> Result<BackendJobRecord, BackendError> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(handle)
            .ok_or_else(|| BackendError::UnknownHandle(handle.to_string()))?;

        match process.child.try_wait() {
            Ok(None) => Ok(BackendJobRecord::new(handle, "running", QueueState::Running)),
            Ok(Some(status)) => {
                processes.remove(handle);
                let mut record = BackendJobRecord::new(handle, "exited", QueueState::Completed);
                record.exit_code = status.code();
                Ok(record)
            }
            Err(e) => Err(BackendError::io(&process.workdir, e)),
        }
    }

    async fn cancel(&self, handle: &str) -> Result<(), BackendError> {
        let process = self.processes.lock().await.remove(handle);
        if let Some(mut process) = process {
            if let Err(e) = process.child.kill().await {
                debug!("Kill of local job {} failed: {}", handle, e);
            }
        }
        Ok(())
    }
}
