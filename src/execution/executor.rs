//! Step executor - runs one pipeline step through its module

use crate::{
    backend::JobBackend,
    core::{
        error::PipelineError,
        manifest::{OutputManifest, MANIFEST_FILE},
        pipeline::Pipeline,
    },
    execution::engine::EventHandler,
    modules::{ModuleContext, ModuleRegistry},
};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a successful step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub manifest: OutputManifest,

    /// Where the manifest was written
    pub manifest_path: PathBuf,

    /// Jobs dispatched by the step
    pub jobs: usize,
}

/// Executes a single step
///
/// Resolves the predecessor manifest, prepares the step directory, runs the
/// module, checks every returned artifact and writes `io.json`.
pub struct StepExecutor {
    registry: Arc<ModuleRegistry>,
    backend: Arc<dyn JobBackend>,
    interrupt: Arc<AtomicBool>,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        backend: Arc<dyn JobBackend>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            backend,
            interrupt,
        }
    }

    /// Execute the step with the given ordinal
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ordinal: usize,
        events: Option<EventHandler>,
    ) -> Result<StepOutcome, PipelineError> {
        let step = pipeline.step(ordinal).ok_or_else(|| PipelineError::ModuleFailed {
            ordinal,
            module: String::new(),
            message: "no such step".to_string(),
        })?;
        info!("Executing step {} ({}) in {}", ordinal, step.key, step.workdir.display());

        let previous = pipeline.predecessor_manifest(ordinal)?;
        debug!(
            "Step {} consumes {} artifact(s) from step {}",
            ordinal,
            previous.len(),
            previous.ordinal
        );

        // Drop a manifest left behind by an earlier run of this step
        let manifest_path = step.workdir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            std::fs::remove_file(&manifest_path)
                .map_err(|e| PipelineError::io(&manifest_path, e))?;
        }
        std::fs::create_dir_all(&step.workdir).map_err(|e| PipelineError::io(&step.workdir, e))?;

        let module = self.registry.create(&step.module)?;
        let mut ctx = ModuleContext::new(step, &pipeline.settings, &previous, self.backend.clone())
            .with_interrupt(self.interrupt.clone());
        if let Some(events) = events {
            ctx = ctx.with_events(events);
        }

        let artifacts = module.run(&mut ctx).await?;
        let jobs = ctx.jobs_run();

        if artifacts.is_empty() {
            return Err(ctx.failed("module produced no artifacts"));
        }

        let manifest = OutputManifest::new(ordinal, step.module.clone(), artifacts);
        let missing = manifest.missing_artifacts(pipeline.run_dir());
        if !missing.is_empty() {
            let listed: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
            return Err(ctx.failed(format!(
                "artifacts missing or empty: {}",
                listed.join(", ")
            )));
        }

        let manifest_path = manifest.save(&step.workdir)?;
        if pipeline.settings.clean {
            let removed = clean_step_dir(&step.workdir, pipeline.run_dir(), &manifest)?;
            debug!("Removed {} job file(s) from {}", removed, step.workdir.display());
        }
        info!(
            "Step {} ({}) wrote {} artifact(s) to {}",
            ordinal,
            step.module,
            manifest.len(),
            manifest_path.display()
        );

        Ok(StepOutcome {
            manifest,
            manifest_path,
            jobs,
        })
    }
}

/// Extensions of job scaffolding left next to step outputs
const SCAFFOLDING: &[&str] = &["job", "out", "err", "list"];

/// Remove job scripts, logs and input lists that are not artifacts
fn clean_step_dir(
    workdir: &Path,
    run_dir: &Path,
    manifest: &OutputManifest,
) -> Result<usize, PipelineError> {
    let keep: Vec<PathBuf> = manifest.artifacts.iter().map(|a| run_dir.join(&a.path)).collect();
    let entries = std::fs::read_dir(workdir).map_err(|e| PipelineError::io(workdir, e))?;

    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(workdir, e))?.path();
        let scaffolding = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCAFFOLDING.contains(&ext));
        if scaffolding && path.is_file() && !keep.contains(&path) {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}
