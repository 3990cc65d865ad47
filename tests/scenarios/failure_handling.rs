//! Test: Failure Handling - a failing step aborts the run

use crate::helpers::*;
use stagerun::core::config::PipelineConfig;
use stagerun::core::pipeline::step_dir;
use stagerun::core::{ExecutionStatus, PipelineError, StepState};
use stagerun::execution::ExecutionEvent;
use stagerun::modules::ModuleRegistry;
use stagerun::persistence::RunSummary;

/// One failing job fails the whole step and skips the rest of the run
#[tokio::test]
async fn test_failed_job_aborts_run() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n"), ("b.pdb", "bad\n")]);
    let mut pipeline = ws.pipeline(
        r#"
[exec]
command = "grep -q bad $INPUT && exit 1; cp $INPUT $OUTPUT"

[exec]
"#,
    );

    let outcome = run_local(&mut pipeline).await;

    match outcome.error() {
        PipelineError::JobFailed {
            ordinal,
            module,
            missing,
        } => {
            assert_eq!(*ordinal, 1);
            assert_eq!(module, "exec");
            assert_eq!(missing, &vec![ws.run_dir().join("step_01/exec_2.dat")]);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // The good job's output stays on disk but the step publishes nothing
    assert!(ws.run_dir().join("step_01/exec_1.dat").is_file());
    assert!(!step_dir(&ws.run_dir(), 1).join("io.json").exists());
    assert!(!step_dir(&ws.run_dir(), 2).exists());

    assert!(matches!(pipeline.steps[1].state, StepState::Failed { .. }));
    assert_skipped_after(&pipeline, 1);
    assert_eq!(outcome.completed_ordinals(), vec![0]);
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepFailed { ordinal: 1, .. })));

    let summary = RunSummary::read(&ws.run_dir()).unwrap();
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(summary.failed_step, Some(1));
    assert!(summary.error.unwrap().contains("exec_2.dat"));
}

/// An empty output file does not count as done
#[tokio::test]
async fn test_empty_output_is_failure() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\ncommand = \"touch $OUTPUT\"\n");

    let outcome = run_local(&mut pipeline).await;

    assert!(matches!(
        outcome.error(),
        PipelineError::JobFailed { ordinal: 1, .. }
    ));
}

/// A job that exits non-zero but leaves its output counts as done
#[tokio::test]
async fn test_output_decides_over_exit_code() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\ncommand = \"cp $INPUT $OUTPUT; exit 7\"\n");

    let outcome = run_local(&mut pipeline).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    assert_eq!(ws.artifact_contents(1), vec!["ATOM a\n"]);
}

/// Failed jobs are resubmitted up to the configured budget
#[tokio::test]
async fn test_resubmission_recovers_flaky_job() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline_with(
        "resubmit = 1",
        r#"
[exec]
command = "if [ -e $OUTPUT.tried ]; then cp $INPUT $OUTPUT; else touch $OUTPUT.tried; exit 1; fi"
"#,
    );

    let outcome = run_local(&mut pipeline).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    assert!(ws.run_dir().join("step_01/exec_1.dat.tried").is_file());
    assert_eq!(ws.artifact_contents(1), vec!["ATOM a\n"]);
}

/// A recipe that does not exist is a configuration error of its step
#[tokio::test]
async fn test_missing_recipe() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\nrecipe = \"/no/such/recipe.sh\"\n");

    let outcome = run_local(&mut pipeline).await;

    let err = outcome.error();
    assert!(err.is_config_error());
    assert_eq!(pipeline.state.failed_step, Some(1));
}

/// Unknown modules and parameters are rejected before anything runs
#[test]
fn test_invalid_configuration_rejected_up_front() {
    let registry = ModuleRegistry::with_builtins();

    let unknown_module = PipelineConfig::from_text("run_dir = \"r\"\n[dock]\n").unwrap();
    assert!(matches!(
        unknown_module.validate(&registry),
        Err(PipelineError::UnknownModule(_))
    ));

    let unknown_param = PipelineConfig::from_text("run_dir = \"r\"\n[exec]\nspeed = 3\n").unwrap();
    assert!(matches!(
        unknown_param.validate(&registry),
        Err(PipelineError::UnknownParameter { .. })
    ));

    assert!(matches!(
        PipelineConfig::from_text("run_dir = \"r\"\n[exec\n"),
        Err(PipelineError::ConfigSyntax { .. })
    ));
}

/// Outputs left by an earlier run in the same directory are not reused
#[tokio::test]
async fn test_rerun_does_not_reuse_old_outputs() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut first = ws.pipeline("[exec]\n");
    assert!(run_local(&mut first).await.result.is_ok());
    assert!(ws.run_dir().join("step_01/exec_1.dat").is_file());

    let mut second = ws.pipeline("[exec]\ncommand = \"exit 7\"\n");
    let outcome = run_local(&mut second).await;

    assert!(matches!(
        outcome.error(),
        PipelineError::JobFailed { ordinal: 1, .. }
    ));
    assert!(!ws.run_dir().join("step_01/exec_1.dat").exists());
    assert!(!step_dir(&ws.run_dir(), 1).join("io.json").exists());
}
