//! Inputs split over a fixed number of workers

use crate::core::{error::PipelineError, manifest::Artifact};
use crate::execution::{parse_ncores, partition, Job};
use crate::modules::{shell_invocation, ModuleContext, PipelineModule};
use async_trait::async_trait;
use tracing::info;

pub const NAME: &str = "chunked";
pub const DEFAULTS: &str = include_str!("defaults/chunked.yaml");

/// Partitions the previous step's artifacts over `ncores` workers
///
/// Worker `i` gets a contiguous slice listed in `chunked_<i>.list` and
/// writes `chunked_<i>.<output_ext>`. Artifacts keep worker order.
pub struct Chunked;

#[async_trait]
impl PipelineModule for Chunked {
    async fn run(&self, ctx: &mut ModuleContext<'_>) -> Result<Vec<Artifact>, PipelineError> {
        let (program, args) = shell_invocation(ctx)?;
        let ext = ctx.param_str("output_ext")?.to_string();
        let requested = match ctx.param_int("ncores")? {
            n if n > 0 => n as usize,
            _ => ctx.settings().ncores,
        };
        let inputs = ctx.require_inputs()?.to_vec();
        let workers = parse_ncores(requested, inputs.len());
        info!("Splitting {} input(s) over {} worker(s)", inputs.len(), workers);

        let mut jobs = Vec::with_capacity(workers);
        for (core, range) in partition(inputs.len(), workers).into_iter().enumerate() {
            let name = format!("{}_{}", NAME, core);
            let list_path = ctx.workdir().join(format!("{}.list", name));
            let listing: String = inputs[range]
                .iter()
                .map(|a| format!("{}\n", ctx.input_path(a).display()))
                .collect();
            std::fs::write(&list_path, listing).map_err(|e| PipelineError::io(&list_path, e))?;

            let output = ctx.workdir().join(format!("{}.{}", name, ext));
            let mut spec = ctx
                .job_spec(program.clone())
                .env("INPUT_LIST", list_path.to_string_lossy())
                .env("OUTPUT", output.to_string_lossy());
            spec.args = args.clone();
            jobs.push(Job::new(name, spec, output));
        }

        let report = ctx.run_jobs(jobs).await?;

        report
            .jobs
            .iter()
            .map(|job| ctx.register(&job.expected_output, None))
            .collect()
    }
}
