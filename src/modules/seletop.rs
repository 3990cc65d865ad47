//! Keep the best-scored artifacts

use crate::core::{error::PipelineError, manifest::Artifact};
use crate::modules::{ModuleContext, PipelineModule};
use async_trait::async_trait;
use tracing::info;

pub const NAME: &str = "seletop";
pub const DEFAULTS: &str = include_str!("defaults/seletop.yaml");

/// Passes on the `select` lowest-scored artifacts of the previous step
///
/// Runs no jobs. Unscored artifacts rank after scored ones; ties keep the
/// previous manifest's order. Selected artifacts keep their originating
/// ordinal and identity token.
pub struct SeleTop;

#[async_trait]
impl PipelineModule for SeleTop {
    async fn run(&self, ctx: &mut ModuleContext<'_>) -> Result<Vec<Artifact>, PipelineError> {
        let select = ctx.param_int("select")?;
        if select < 1 {
            return Err(PipelineError::InvalidValue {
                key: "seletop.select".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let available = ctx.require_inputs()?.len();

        let selected: Vec<Artifact> = ctx
            .previous()
            .ranked()
            .into_iter()
            .take(select as usize)
            .cloned()
            .collect();

        info!("Selected {} of {} artifact(s)", selected.len(), available);
        Ok(selected)
    }
}
