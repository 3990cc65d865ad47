//! Setup phase: registers the run's input files

use crate::core::{error::PipelineError, manifest::Artifact};
use crate::modules::{ModuleContext, PipelineModule};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

pub const NAME: &str = "topology";
pub const DEFAULTS: &str = include_str!("defaults/topology.yaml");

/// Copies the input molecules into the setup directory
pub struct Topology;

#[async_trait]
impl PipelineModule for Topology {
    async fn run(&self, ctx: &mut ModuleContext<'_>) -> Result<Vec<Artifact>, PipelineError> {
        let mut inputs = ctx.settings().molecules.clone();
        inputs.extend(ctx.param_paths("molecules")?);
        if inputs.is_empty() {
            return Err(ctx.failed("no input molecules; set `molecules` in the configuration"));
        }

        let mut used = HashSet::new();
        let mut artifacts = Vec::with_capacity(inputs.len());
        for (i, source) in inputs.iter().enumerate() {
            if !source.is_file() {
                return Err(ctx.failed(format!("input {} not found", source.display())));
            }
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("molecule_{}", i + 1));
            let name = if used.insert(name.clone()) {
                name
            } else {
                format!("{}_{}", i + 1, name)
            };

            let dest = ctx.workdir().join(&name);
            std::fs::copy(source, &dest).map_err(|e| PipelineError::io(&dest, e))?;
            artifacts.push(ctx.register(&dest, None)?);
        }

        info!("Registered {} input molecule(s)", artifacts.len());
        Ok(artifacts)
    }
}
