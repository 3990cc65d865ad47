//! Test: Success Chain - steps run in order, each consuming its predecessor

use crate::helpers::*;
use stagerun::core::config::PipelineConfig;
use stagerun::core::pipeline::step_dir;
use stagerun::core::ExecutionStatus;
use stagerun::execution::ExecutionEvent;
use stagerun::modules::ModuleRegistry;
use stagerun::persistence::RunSummary;

/// Two job steps after the implicit setup phase
#[tokio::test]
async fn test_two_step_local_run() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n"), ("b.pdb", "ATOM b\n")]);
    let mut pipeline = ws.pipeline(
        r#"
[exec]
command = "tr a-z A-Z < $INPUT > $OUTPUT"

[exec]
command = "cat $INPUT $INPUT > $OUTPUT"
"#,
    );
    assert_eq!(pipeline.steps.len(), 3);
    assert_eq!(pipeline.steps[1].key, "exec.1");
    assert_eq!(pipeline.steps[2].key, "exec.2");

    let outcome = run_local(&mut pipeline).await;

    let summary = outcome.summary();
    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.completed_steps, 3);
    assert_eq!(outcome.completed_ordinals(), vec![0, 1, 2]);

    // One manifest per step, in the expected directories
    for ordinal in 0..3 {
        assert!(step_dir(&ws.run_dir(), ordinal).join("io.json").is_file());
    }
    assert!(ws.run_dir().join("topology").is_dir());
    assert!(ws.run_dir().join("step_01").is_dir());
    assert!(ws.run_dir().join("step_02").is_dir());

    assert_eq!(
        ws.artifact_contents(2),
        vec!["ATOM A\nATOM A\n", "ATOM B\nATOM B\n"]
    );

    // Step 2 only references outputs produced in step 2
    let manifest = ws.manifest(2);
    assert!(manifest.artifacts.iter().all(|a| a.ordinal == 2));
    assert!(manifest.artifacts.iter().all(|a| a.path.starts_with("step_02")));
}

/// The run summary on disk mirrors the returned one
#[tokio::test]
async fn test_run_summary_written() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\n");

    let outcome = run_local(&mut pipeline).await;
    let on_disk = RunSummary::read(&ws.run_dir()).unwrap();

    assert_eq!(on_disk.run_id, outcome.summary().run_id);
    assert_eq!(on_disk.name, "run");
    assert_eq!(on_disk.steps.len(), 2);
    assert!(on_disk.steps.iter().all(|s| s.status == "completed"));
    assert_eq!(on_disk.steps[1].jobs, 1);
}

/// Event stream brackets every step
#[tokio::test]
async fn test_event_order() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n"), ("b.pdb", "ATOM b\n")]);
    let mut pipeline = ws.pipeline("[exec]\n");

    let outcome = run_local(&mut pipeline).await;
    assert!(outcome.result.is_ok());

    let kinds: Vec<&str> = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::RunStarted { .. } => Some("run"),
            ExecutionEvent::StepStarted { .. } => Some("start"),
            ExecutionEvent::JobsSubmitted { .. } => Some("jobs"),
            ExecutionEvent::StepCompleted { .. } => Some("done"),
            ExecutionEvent::RunCompleted { .. } => Some("end"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["run", "start", "done", "start", "jobs", "done", "end"]);

    let last_progress = outcome.events.iter().rev().find_map(|e| match e {
        ExecutionEvent::JobProgress {
            finished, total, ..
        } => Some((*finished, *total)),
        _ => None,
    });
    assert_eq!(last_progress, Some((2, 2)));
}

/// An explicit leading `[topology]` section configures the setup phase
#[tokio::test]
async fn test_explicit_setup_section() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    std::fs::write(ws.path().join("extra.pdb"), "ATOM x\n").unwrap();
    let extra = ws.path().join("extra.pdb");
    let mut pipeline = ws.pipeline(&format!(
        "[topology]\nmolecules = [\"{}\"]\n\n[exec]\n",
        extra.display()
    ));
    assert_eq!(pipeline.steps.len(), 2);

    let outcome = run_local(&mut pipeline).await;

    assert!(outcome.result.is_ok());
    assert_eq!(ws.manifest(0).len(), 2);
    assert_eq!(ws.artifact_contents(1), vec!["ATOM a\n", "ATOM x\n"]);
}

/// A run directory given relative to the working directory still runs jobs
/// correctly from inside their step directories
#[tokio::test]
async fn test_relative_run_dir() {
    let area = tempfile::Builder::new()
        .prefix("relative-run")
        .tempdir_in(".")
        .unwrap();
    let rel = area.path().to_path_buf();
    assert!(rel.is_relative());
    std::fs::write(rel.join("a.pdb"), "ATOM a\n").unwrap();

    let text = format!(
        "run_dir = \"{0}/run\"\nmolecules = [\"{0}/a.pdb\"]\npoll_interval_secs = 0.02\n\n[exec]\n",
        rel.display()
    );
    let mut pipeline = PipelineConfig::from_text(&text)
        .unwrap()
        .to_pipeline(&ModuleRegistry::with_builtins())
        .unwrap();
    assert!(pipeline.run_dir().is_absolute());
    assert!(pipeline.steps.iter().all(|s| s.workdir.is_absolute()));

    let outcome = run_local(&mut pipeline).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    let output = std::fs::read_to_string(rel.join("run/step_01/exec_1.dat")).unwrap();
    assert_eq!(output, "ATOM a\n");
}
