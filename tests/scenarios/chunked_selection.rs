//! Test: Selection and chunking - scored outputs ranked, then merged

use crate::helpers::*;
use stagerun::core::ExecutionStatus;

const SCORED_EXEC: &str = r#"
[exec]
command = "cp $INPUT $OUTPUT; wc -c < $INPUT > $SCORE_FILE"
"#;

fn workspace() -> Workspace {
    Workspace::new(&[
        ("a.pdb", "aaaaaa\n"),
        ("b.pdb", "bb\n"),
        ("c.pdb", "cccc\n"),
        ("d.pdb", "d\n"),
    ])
}

/// seletop keeps the lowest scores, chunked splits them over two workers
#[tokio::test]
async fn test_select_then_chunk() {
    let ws = workspace();
    let mut pipeline = ws.pipeline(&format!(
        "{}\n[seletop]\nselect = 3\n\n[chunked]\nncores = 2\n",
        SCORED_EXEC
    ));

    let outcome = run_local(&mut pipeline).await;
    assert_eq!(outcome.summary().status, ExecutionStatus::Completed);

    let scores: Vec<Option<f64>> = ws.manifest(1).artifacts.iter().map(|a| a.score).collect();
    assert_eq!(scores, vec![Some(7.0), Some(3.0), Some(5.0), Some(2.0)]);

    // Selected artifacts still point at the exec step's files
    let selected = ws.manifest(2);
    assert_eq!(selected.module, "seletop");
    assert!(selected.artifacts.iter().all(|a| a.ordinal == 1));
    assert_eq!(ws.artifact_contents(2), vec!["d\n", "bb\n", "cccc\n"]);
    assert_eq!(outcome.summary().steps[2].jobs, 0);

    assert_eq!(ws.artifact_contents(3), vec!["d\nbb\n", "cccc\n"]);
    assert!(ws.run_dir().join("step_03/chunked_0.list").is_file());
}

/// Asking for more workers than inputs runs one worker per input
#[tokio::test]
async fn test_chunked_caps_workers() {
    let ws = workspace();
    let mut pipeline = ws.pipeline("[chunked]\nncores = 16\n");

    let outcome = run_local(&mut pipeline).await;

    assert_eq!(outcome.summary().steps[1].jobs, 4);
    assert_eq!(ws.manifest(1).len(), 4);
}

/// With `clean` set only outputs and manifests survive in step directories
#[tokio::test]
async fn test_clean_run_directory() {
    let ws = workspace();
    let mut pipeline = ws.pipeline_with("clean = true", "[chunked]\nncores = 2\n");

    let outcome = run_local(&mut pipeline).await;
    assert!(outcome.result.is_ok());

    let mut names: Vec<String> = std::fs::read_dir(ws.run_dir().join("step_01"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["chunked_0.dat", "chunked_1.dat", "io.json"]);
}
