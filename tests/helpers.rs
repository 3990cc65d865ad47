//! Test utility functions for stagerun

#![allow(dead_code)]

use async_trait::async_trait;
use stagerun::backend::{BackendError, CommandOutput, CommandRunner, JobBackend, LocalBackend};
use stagerun::core::config::PipelineConfig;
use stagerun::core::manifest::OutputManifest;
use stagerun::core::pipeline::step_dir;
use stagerun::core::{Pipeline, PipelineError, StepState};
use stagerun::execution::{ExecutionEngine, ExecutionEvent};
use stagerun::modules::ModuleRegistry;
use stagerun::persistence::RunSummary;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Working area of one scenario: input molecules plus a config file
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    /// Create a workspace with the given input files under `data/`
    pub fn new(inputs: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        for (name, content) in inputs {
            std::fs::write(dir.path().join("data").join(name), content).unwrap();
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.path().join("run")
    }

    /// Write `pipeline.cfg` with relative paths, extra run keys and the
    /// given step sections
    pub fn write_config(&self, run_keys: &str, steps: &str) -> PathBuf {
        let mut inputs: Vec<String> = std::fs::read_dir(self.path().join("data"))
            .unwrap()
            .map(|e| format!("\"data/{}\"", e.unwrap().file_name().to_string_lossy()))
            .collect();
        inputs.sort();

        let text = format!(
            "run_dir = \"run\"\nmolecules = [{}]\npoll_interval_secs = 0.02\n{}\n\n{}",
            inputs.join(", "),
            run_keys,
            steps
        );
        let path = self.path().join("pipeline.cfg");
        std::fs::write(&path, text).unwrap();
        path
    }

    /// Load a pipeline from a freshly written config file
    pub fn pipeline(&self, steps: &str) -> Pipeline {
        self.pipeline_with("", steps)
    }

    pub fn pipeline_with(&self, run_keys: &str, steps: &str) -> Pipeline {
        let path = self.write_config(run_keys, steps);
        PipelineConfig::from_file(&path)
            .unwrap()
            .to_pipeline(&ModuleRegistry::with_builtins())
            .unwrap()
    }

    pub fn manifest(&self, ordinal: usize) -> OutputManifest {
        OutputManifest::load(&step_dir(&self.run_dir(), ordinal)).unwrap()
    }

    /// Contents of every artifact of a step's manifest, in manifest order
    pub fn artifact_contents(&self, ordinal: usize) -> Vec<String> {
        self.manifest(ordinal)
            .artifacts
            .iter()
            .map(|a| std::fs::read_to_string(self.run_dir().join(&a.path)).unwrap())
            .collect()
    }
}

/// What a run returned plus every event it emitted
pub struct RunOutcome {
    pub result: Result<RunSummary, PipelineError>,
    pub events: Vec<ExecutionEvent>,
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        self.result.as_ref().unwrap()
    }

    pub fn error(&self) -> &PipelineError {
        self.result.as_ref().unwrap_err()
    }

    pub fn completed_ordinals(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepCompleted { ordinal, .. } => Some(*ordinal),
                _ => None,
            })
            .collect()
    }
}

/// Run a pipeline on the local backend
pub async fn run_local(pipeline: &mut Pipeline) -> RunOutcome {
    run_with_backend(pipeline, Arc::new(LocalBackend::new())).await
}

/// Run a pipeline on any backend, collecting events
pub async fn run_with_backend(pipeline: &mut Pipeline, backend: Arc<dyn JobBackend>) -> RunOutcome {
    let mut engine = ExecutionEngine::new(Arc::new(ModuleRegistry::with_builtins()), backend);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |e: ExecutionEvent| sink.lock().unwrap().push(e));

    let result = engine.execute(pipeline).await;
    let events = events.lock().unwrap().clone();
    RunOutcome { result, events }
}

pub fn assert_skipped_after(pipeline: &Pipeline, ordinal: usize) {
    for step in pipeline.steps.iter().skip(ordinal + 1) {
        assert!(
            matches!(step.state, StepState::Skipped { .. }),
            "step {} should be skipped, got {:?}",
            step.ordinal,
            step.state
        );
    }
}

/// Queue flavour emulated by [`FakeCluster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    Slurm,
    Torque,
}

/// Command runner standing in for a batch cluster
///
/// Submitting runs the job script to completion with `sh`; status queries
/// then report the job as finished. Every call is recorded.
pub struct FakeCluster {
    flavour: Flavour,
    /// Status queries answer as if finished jobs were already purged
    purged: bool,
    next_id: AtomicUsize,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeCluster {
    pub fn new(flavour: Flavour) -> Arc<Self> {
        Self::build(flavour, false)
    }

    /// A cluster that forgets jobs as soon as they finish
    pub fn purging(flavour: Flavour) -> Arc<Self> {
        Self::build(flavour, true)
    }

    fn build(flavour: Flavour, purged: bool) -> Arc<Self> {
        Arc::new(Self {
            flavour,
            purged,
            next_id: AtomicUsize::new(100),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    fn reply(stdout: String) -> CommandOutput {
        CommandOutput {
            code: 0,
            stdout,
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeCluster {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        match program {
            "sbatch" | "qsub" => {
                let script = &args[0];
                let status = tokio::process::Command::new("sh")
                    .arg(script)
                    .status()
                    .await
                    .map_err(|e| BackendError::Spawn {
                        program: "sh".to_string(),
                        source: e,
                    })?;
                assert!(status.code().is_some());
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                Ok(Self::reply(match self.flavour {
                    Flavour::Slurm => format!("Submitted batch job {}\n", id),
                    Flavour::Torque => format!("{}.headnode\n", id),
                }))
            }
            "scontrol" if self.purged => Ok(Self::reply(
                "slurm_load_jobs error: Invalid job id specified\n".to_string(),
            )),
            "qstat" if self.purged => Ok(Self::reply(format!(
                "qstat: Unknown Job Id Error {}\n",
                args[1]
            ))),
            "scontrol" => Ok(Self::reply(format!(
                "JobId={} JobName=job\n   JobState=COMPLETED Reason=None\n",
                args[3]
            ))),
            "qstat" => Ok(Self::reply(format!(
                "Job Id: {}\n    job_state = C\n",
                args[1]
            ))),
            "scancel" | "qdel" => Ok(Self::reply(String::new())),
            other => panic!("unexpected program {}", other),
        }
    }
}
