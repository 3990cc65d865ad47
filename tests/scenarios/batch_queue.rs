//! Test: Batch queues - SLURM and Torque backends driven end to end

use crate::helpers::*;
use stagerun::backend::{QueueBackend, Slurm, Torque};
use stagerun::core::{ExecutionStatus, PipelineError};
use std::sync::Arc;

#[tokio::test]
async fn test_slurm_run() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n"), ("b.pdb", "ATOM b\n")]);
    let mut pipeline = ws.pipeline_with("job_timeout_min = 70", "[exec]\n");
    let cluster = FakeCluster::new(Flavour::Slurm);
    let backend = Arc::new(QueueBackend::new(Slurm, cluster.clone(), Some("short".to_string())));

    let outcome = run_with_backend(&mut pipeline, backend).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    assert_eq!(ws.artifact_contents(1), vec!["ATOM a\n", "ATOM b\n"]);

    let programs = cluster.programs();
    assert_eq!(programs.iter().filter(|p| *p == "sbatch").count(), 2);
    assert!(programs.iter().any(|p| p == "scontrol"));
    assert!(!programs.iter().any(|p| p == "scancel"));

    let script = std::fs::read_to_string(ws.run_dir().join("step_01/exec_1.job")).unwrap();
    assert!(script.contains("#SBATCH -p short\n"));
    assert!(script.contains("#SBATCH --time=01:10:00\n"));
    assert!(script.contains(&format!(
        "#SBATCH --output={}",
        ws.run_dir().join("step_01/exec_1.out").display()
    )));
}

#[tokio::test]
async fn test_torque_run() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\n");
    let cluster = FakeCluster::new(Flavour::Torque);
    let backend = Arc::new(QueueBackend::new(Torque, cluster.clone(), None));

    let outcome = run_with_backend(&mut pipeline, backend).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    let programs = cluster.programs();
    assert!(programs.contains(&"qsub".to_string()));
    assert!(programs.contains(&"qstat".to_string()));

    let script = std::fs::read_to_string(ws.run_dir().join("step_01/exec_1.job")).unwrap();
    assert!(script.contains("#PBS -l walltime=01:00:00\n"));
    assert!(!script.contains("#PBS -q"));
}

/// Jobs purged from the queue after finishing are judged by their output
#[tokio::test]
async fn test_purged_torque_jobs() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n"), ("b.pdb", "ATOM b\n")]);
    let mut pipeline = ws.pipeline(
        r#"
[exec]
command = "grep -q b $INPUT && exit 1; cp $INPUT $OUTPUT"
"#,
    );
    let cluster = FakeCluster::purging(Flavour::Torque);
    let backend = Arc::new(QueueBackend::new(Torque, cluster.clone(), None));

    let outcome = run_with_backend(&mut pipeline, backend).await;

    match outcome.error() {
        PipelineError::JobFailed { missing, .. } => {
            assert_eq!(missing, &vec![ws.run_dir().join("step_01/exec_2.dat")]);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(ws.run_dir().join("step_01/exec_1.dat").is_file());
}

/// The same holds for SLURM's invalid job id answer
#[tokio::test]
async fn test_purged_slurm_jobs() {
    let ws = Workspace::new(&[("a.pdb", "ATOM a\n")]);
    let mut pipeline = ws.pipeline("[exec]\n");
    let cluster = FakeCluster::purging(Flavour::Slurm);
    let backend = Arc::new(QueueBackend::new(Slurm, cluster, None));

    let outcome = run_with_backend(&mut pipeline, backend).await;

    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);
    assert_eq!(ws.artifact_contents(1), vec!["ATOM a\n"]);
}
