//! One job per input artifact

use crate::core::{error::PipelineError, manifest::Artifact};
use crate::execution::Job;
use crate::modules::{read_score, shell_invocation, ModuleContext, PipelineModule};
use async_trait::async_trait;

pub const NAME: &str = "exec";
pub const DEFAULTS: &str = include_str!("defaults/exec.yaml");

/// Runs a command or recipe once per artifact of the previous step
///
/// Job `exec_<i>` reads `$INPUT` and writes `exec_<i>.<output_ext>`; a
/// number written to `$SCORE_FILE` becomes the artifact's score.
pub struct Exec;

#[async_trait]
impl PipelineModule for Exec {
    async fn run(&self, ctx: &mut ModuleContext<'_>) -> Result<Vec<Artifact>, PipelineError> {
        let (program, args) = shell_invocation(ctx)?;
        let ext = ctx.param_str("output_ext")?.to_string();
        let cores = ctx.param_int("cores")?.max(1) as usize;
        let inputs = ctx.require_inputs()?.to_vec();

        let mut jobs = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let name = format!("{}_{}", NAME, i + 1);
            let output = ctx.workdir().join(format!("{}.{}", name, ext));
            let score_file = ctx.workdir().join(format!("{}.score", name));

            let mut spec = ctx
                .job_spec(program.clone())
                .env("INPUT", ctx.input_path(input).to_string_lossy())
                .env("OUTPUT", output.to_string_lossy())
                .env("SCORE_FILE", score_file.to_string_lossy());
            spec.args = args.clone();
            spec.resources.cores = cores;
            jobs.push(Job::new(name, spec, output).with_side_output(score_file));
        }

        let report = ctx.run_jobs(jobs).await?;

        report
            .jobs
            .iter()
            .map(|job| {
                let score = read_score(&job.workdir().join(format!("{}.score", job.name)));
                ctx.register(&job.expected_output, score)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::core::{
        config::{loads, ConfigValue, RunSettings},
        manifest::OutputManifest,
        step::Step,
    };
    use crate::modules::ModuleRegistry;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn exec_step(run_dir: &Path, section: &str) -> Step {
        let tree = loads(&format!("[exec]\n{}", section)).unwrap();
        let overrides = tree.get("exec").and_then(ConfigValue::as_table).unwrap();
        let params = ModuleRegistry::with_builtins()
            .resolve_params(NAME, overrides)
            .unwrap();
        let workdir = run_dir.join("step_01");
        std::fs::create_dir_all(&workdir).unwrap();
        Step::new(1, "exec", NAME, params, workdir)
    }

    fn inputs(run_dir: &Path, names: &[&str]) -> OutputManifest {
        let setup = run_dir.join("topology");
        std::fs::create_dir_all(&setup).unwrap();
        let artifacts = names
            .iter()
            .map(|name| {
                let path = setup.join(name);
                std::fs::write(&path, format!("content of {}", name)).unwrap();
                Artifact::register(run_dir, &path, 0, None).unwrap()
            })
            .collect();
        OutputManifest::new(0, "topology", artifacts)
    }

    fn settings(run_dir: &Path) -> RunSettings {
        let mut settings = RunSettings::default();
        settings.run_dir = run_dir.to_path_buf();
        settings.ncores = 2;
        settings.poll_interval = Duration::from_millis(10);
        settings
    }

    #[tokio::test]
    async fn test_one_job_per_input_with_scores() {
        let run = tempfile::tempdir().unwrap();
        let step = exec_step(
            run.path(),
            "command = \"cp $INPUT $OUTPUT && wc -c < $INPUT > $SCORE_FILE\"\n",
        );
        let previous = inputs(run.path(), &["a.pdb", "bb.pdb", "ccc.pdb"]);
        let settings = settings(run.path());
        let mut ctx = ModuleContext::new(&step, &settings, &previous, Arc::new(LocalBackend::new()));

        let artifacts = Exec.run(&mut ctx).await.unwrap();

        assert_eq!(artifacts.len(), 3);
        assert_eq!(artifacts[0].path, Path::new("step_01/exec_1.dat"));
        assert_eq!(artifacts[2].path, Path::new("step_01/exec_3.dat"));
        assert_eq!(artifacts[0].score, Some(16.0));
        assert_eq!(artifacts[2].score, Some(18.0));
        assert_eq!(
            std::fs::read_to_string(run.path().join("step_01/exec_2.dat")).unwrap(),
            "content of bb.pdb"
        );
        assert_eq!(ctx.jobs_run(), 3);
    }

    #[tokio::test]
    async fn test_recipe_script() {
        let run = tempfile::tempdir().unwrap();
        let recipe = run.path().join("recipe.sh");
        std::fs::write(&recipe, "tr a-z A-Z < \"$INPUT\" > \"$OUTPUT\"\n").unwrap();
        let step = exec_step(
            run.path(),
            &format!("recipe = \"{}\"\noutput_ext = \"txt\"\n", recipe.display()),
        );
        let previous = inputs(run.path(), &["a.pdb"]);
        let settings = settings(run.path());
        let mut ctx = ModuleContext::new(&step, &settings, &previous, Arc::new(LocalBackend::new()));

        let artifacts = Exec.run(&mut ctx).await.unwrap();
        assert_eq!(artifacts[0].path, Path::new("step_01/exec_1.txt"));
        assert_eq!(
            std::fs::read_to_string(run.path().join("step_01/exec_1.txt")).unwrap(),
            "CONTENT OF A.PDB"
        );
    }

    #[tokio::test]
    async fn test_missing_recipe_fails_before_jobs() {
        let run = tempfile::tempdir().unwrap();
        let step = exec_step(run.path(), "recipe = \"/no/such/recipe.sh\"\n");
        let previous = inputs(run.path(), &["a.pdb"]);
        let settings = settings(run.path());
        let mut ctx = ModuleContext::new(&step, &settings, &previous, Arc::new(LocalBackend::new()));

        assert!(matches!(
            Exec.run(&mut ctx).await,
            Err(PipelineError::ConfigMissing(_))
        ));
        assert_eq!(ctx.jobs_run(), 0);
    }

    #[tokio::test]
    async fn test_failing_command_names_missing_outputs() {
        let run = tempfile::tempdir().unwrap();
        let step = exec_step(
            run.path(),
            "command = \"case $INPUT in *b.pdb) exit 1;; *) cp $INPUT $OUTPUT;; esac\"\n",
        );
        let previous = inputs(run.path(), &["a.pdb", "b.pdb"]);
        let settings = settings(run.path());
        let mut ctx = ModuleContext::new(&step, &settings, &previous, Arc::new(LocalBackend::new()));

        match Exec.run(&mut ctx).await {
            Err(PipelineError::JobFailed { ordinal, missing, .. }) => {
                assert_eq!(ordinal, 1);
                assert_eq!(missing, vec![run.path().join("step_01/exec_2.dat")]);
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.len())),
        }
    }

    #[tokio::test]
    async fn test_no_inputs_fails() {
        let run = tempfile::tempdir().unwrap();
        let step = exec_step(run.path(), "");
        let previous = OutputManifest::new(0, "topology", vec![]);
        let settings = settings(run.path());
        let mut ctx = ModuleContext::new(&step, &settings, &previous, Arc::new(LocalBackend::new()));

        assert!(matches!(
            Exec.run(&mut ctx).await,
            Err(PipelineError::ModuleFailed { .. })
        ));
    }
}
