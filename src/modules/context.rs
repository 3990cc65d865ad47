//! What a module sees while it runs

use crate::{
    backend::JobBackend,
    core::{
        config::{ConfigTable, ConfigValue, RunSettings},
        error::PipelineError,
        manifest::{Artifact, OutputManifest},
        step::Step,
    },
    execution::{
        engine::{EventHandler, ExecutionEvent},
        job::{Job, JobSpec, JobStatus, ResourceRequest},
        scheduler::{JobProgress, JobScheduler, SchedulerConfig, SchedulerReport},
    },
};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Runtime context of one step
pub struct ModuleContext<'a> {
    step: &'a Step,
    settings: &'a RunSettings,
    previous: &'a OutputManifest,
    backend: Arc<dyn JobBackend>,
    interrupt: Arc<AtomicBool>,
    events: Option<EventHandler>,
    jobs_run: usize,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        step: &'a Step,
        settings: &'a RunSettings,
        previous: &'a OutputManifest,
        backend: Arc<dyn JobBackend>,
    ) -> Self {
        Self {
            step,
            settings,
            previous,
            backend,
            interrupt: Arc::new(AtomicBool::new(false)),
            events: None,
            jobs_run: 0,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_events(mut self, events: EventHandler) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ordinal(&self) -> usize {
        self.step.ordinal
    }

    pub fn module(&self) -> &str {
        &self.step.module
    }

    pub fn workdir(&self) -> &Path {
        &self.step.workdir
    }

    pub fn run_dir(&self) -> &Path {
        &self.settings.run_dir
    }

    pub fn settings(&self) -> &RunSettings {
        self.settings
    }

    pub fn params(&self) -> &ConfigTable {
        &self.step.params
    }

    /// Manifest of the previous step (empty for the setup phase)
    pub fn previous(&self) -> &OutputManifest {
        self.previous
    }

    /// Number of jobs dispatched so far
    pub fn jobs_run(&self) -> usize {
        self.jobs_run
    }

    fn param(&self, key: &str) -> Result<&ConfigValue, PipelineError> {
        self.step.params.get(key).ok_or_else(|| {
            PipelineError::ConfigMissing(format!("parameter '{}' of step {}", key, self.step.key))
        })
    }

    fn invalid(&self, key: &str, expected: &str, value: &ConfigValue) -> PipelineError {
        PipelineError::InvalidValue {
            key: format!("{}.{}", self.step.key, key),
            message: format!("expected {}, found {}", expected, value.kind()),
        }
    }

    pub fn param_str(&self, key: &str) -> Result<&str, PipelineError> {
        let value = self.param(key)?;
        value.as_str().ok_or_else(|| self.invalid(key, "a string", value))
    }

    pub fn param_int(&self, key: &str) -> Result<i64, PipelineError> {
        let value = self.param(key)?;
        value.as_int().ok_or_else(|| self.invalid(key, "an integer", value))
    }

    pub fn param_bool(&self, key: &str) -> Result<bool, PipelineError> {
        let value = self.param(key)?;
        value.as_bool().ok_or_else(|| self.invalid(key, "true or false", value))
    }

    /// Optional path parameter; an empty string means unset
    pub fn param_path(&self, key: &str) -> Result<Option<PathBuf>, PipelineError> {
        let value = self.param(key)?;
        let path = value.as_path().ok_or_else(|| self.invalid(key, "a path", value))?;
        if path.as_os_str().is_empty() {
            Ok(None)
        } else {
            Ok(Some(path.to_path_buf()))
        }
    }

    /// List of paths parameter
    pub fn param_paths(&self, key: &str) -> Result<Vec<PathBuf>, PipelineError> {
        let value = self.param(key)?;
        let items = value
            .as_list()
            .ok_or_else(|| self.invalid(key, "a list of paths", value))?;
        items
            .iter()
            .map(|item| {
                item.as_path()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| self.invalid(key, "a list of paths", item))
            })
            .collect()
    }

    /// Artifacts of the previous step; a step with nothing to work on fails
    pub fn require_inputs(&self) -> Result<&[Artifact], PipelineError> {
        if self.previous.is_empty() {
            return Err(self.failed("no artifacts available from the previous step"));
        }
        Ok(&self.previous.artifacts)
    }

    /// Absolute location of an input artifact
    pub fn input_path(&self, artifact: &Artifact) -> PathBuf {
        artifact.resolve(self.run_dir())
    }

    /// Submission descriptor running in this step's directory
    pub fn job_spec(&self, program: impl Into<String>) -> JobSpec {
        JobSpec::new(program, self.workdir())
            .env("RUN_DIR", self.run_dir().to_string_lossy())
            .env("STEP_DIR", self.workdir().to_string_lossy())
            .env("ORDINAL", self.ordinal().to_string())
            .resources(ResourceRequest {
                cores: 1,
                walltime_min: self.settings.job_timeout_min,
            })
    }

    /// Register a produced file as an artifact of this step
    pub fn register(&self, path: &Path, score: Option<f64>) -> Result<Artifact, PipelineError> {
        Artifact::register(self.run_dir(), path, self.ordinal(), score)
    }

    /// Diagnostic error for a step that cannot proceed
    pub fn failed(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::ModuleFailed {
            ordinal: self.step.ordinal,
            module: self.step.module.clone(),
            message: message.into(),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            events(event);
        }
    }

    /// Dispatch jobs and wait for all of them
    ///
    /// Succeeds only if every job is `done`. Otherwise the error names the
    /// outputs of the jobs that failed or timed out.
    pub async fn run_jobs(&mut self, jobs: Vec<Job>) -> Result<SchedulerReport, PipelineError> {
        let total = jobs.len();
        self.jobs_run += total;
        info!("Step {} ({}): running {} job(s)", self.ordinal(), self.module(), total);
        self.emit(ExecutionEvent::JobsSubmitted {
            ordinal: self.ordinal(),
            count: total,
        });

        let mut scheduler = JobScheduler::new(
            self.backend.clone(),
            SchedulerConfig::from_settings(self.settings),
        )
        .with_interrupt(self.interrupt.clone());
        if let Some(events) = self.events.clone() {
            let ordinal = self.ordinal();
            scheduler = scheduler.with_progress(Arc::new(move |p: JobProgress| {
                events(ExecutionEvent::JobProgress {
                    ordinal,
                    finished: p.finished,
                    failed: p.failed,
                    total: p.total,
                })
            }));
        }

        let report = scheduler.run(jobs).await;

        if report.interrupted {
            return Err(PipelineError::Interrupted {
                ordinal: self.ordinal(),
                module: self.module().to_string(),
            });
        }
        let failed = report.outputs_with(JobStatus::Failed);
        let timed_out = report.outputs_with(JobStatus::TimedOut);
        if !failed.is_empty() {
            let mut missing = failed;
            missing.extend(timed_out);
            return Err(PipelineError::JobFailed {
                ordinal: self.ordinal(),
                module: self.module().to_string(),
                missing,
            });
        }
        if !timed_out.is_empty() {
            return Err(PipelineError::JobTimedOut {
                ordinal: self.ordinal(),
                module: self.module().to_string(),
                missing: timed_out,
            });
        }
        Ok(report)
    }
}
