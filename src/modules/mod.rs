//! Pipeline modules
//!
//! A module turns the previous step's manifest into jobs and the jobs'
//! outputs into artifacts. Modules never write manifests themselves; the
//! step executor validates and stores what `run` returns.

pub mod chunked;
pub mod context;
pub mod exec;
pub mod registry;
pub mod seletop;
pub mod topology;

pub use context::ModuleContext;
pub use registry::{DefaultsSource, ModuleConstructor, ModuleRegistry};

use crate::core::{error::PipelineError, manifest::Artifact};
use async_trait::async_trait;
use std::path::Path;

/// Trait for module types
#[async_trait]
pub trait PipelineModule: Send + Sync {
    /// Build and run the step's jobs and return the artifacts to expose
    async fn run(&self, ctx: &mut ModuleContext<'_>) -> Result<Vec<Artifact>, PipelineError>;
}

/// Program and arguments for modules running a `command` or a `recipe`
///
/// A recipe wins over a command. A recipe that does not exist is a
/// configuration error and is reported before any job is built.
pub(crate) fn shell_invocation(
    ctx: &ModuleContext<'_>,
) -> Result<(String, Vec<String>), PipelineError> {
    if let Some(recipe) = ctx.param_path("recipe")? {
        if !recipe.is_file() {
            return Err(PipelineError::ConfigMissing(format!(
                "recipe {} for step {} ({})",
                recipe.display(),
                ctx.ordinal(),
                ctx.module()
            )));
        }
        let recipe = std::fs::canonicalize(&recipe).map_err(|e| PipelineError::io(&recipe, e))?;
        return Ok(("sh".to_string(), vec![recipe.to_string_lossy().into_owned()]));
    }

    let command = ctx.param_str("command")?;
    if command.trim().is_empty() {
        return Err(PipelineError::ConfigMissing(format!(
            "command or recipe for step {} ({})",
            ctx.ordinal(),
            ctx.module()
        )));
    }
    Ok(("sh".to_string(), vec!["-c".to_string(), command.to_string()]))
}

/// Score written by a job, if any
pub(crate) fn read_score(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|score| score.is_finite())
}
