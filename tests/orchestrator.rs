//! Scheduling, fault isolation and worker failure handling.

mod common;

use std::fs;

use batch_ocr::checkpoint::{CheckpointStatus, CheckpointStore};
use batch_ocr::core::BatchError;
use batch_ocr::worker::{Orchestrator, RunOutcome};
use common::*;

#[test]
fn test_corrupt_document_does_not_stop_worker() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_png(&input.join("a.png"));
    write_corrupt_png(&input.join("b.png"));
    write_png(&input.join("c.png"));

    let summary = run(run_config(&input, &output, vec![0]), ScriptedLoader::default());
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(summary.abnormal_exits.is_empty());

    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert_eq!(checkpoint.len(), 3);
    assert_eq!(checkpoint["a"].status, CheckpointStatus::Done);
    assert_eq!(checkpoint["c"].status, CheckpointStatus::Done);
    let failed = &checkpoint["b"];
    assert_eq!(failed.status, CheckpointStatus::Error);
    assert!(failed.error.is_some());
    assert_eq!(failed.word_count, None);

    // One three-word line per image.
    assert_eq!(summary.totals.word_count, 2 * 3);
    assert!(output.join("raw/a_raw_text.json").is_file());
    assert!(!output.join("raw/b_raw_text.json").exists());

    // Only the failed document is retried.
    let retry = run(run_config(&input, &output, vec![0]), ScriptedLoader::default());
    assert_eq!(retry.already_done, 2);
    assert_eq!(retry.scheduled, 1);
}

#[test]
fn test_files_spread_over_gpus() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    for name in ["a", "b", "c", "d", "e"] {
        write_png(&input.join(format!("{name}.png")));
    }

    let summary = run(run_config(&input, &output, vec![0, 1, 2]), ScriptedLoader::default());
    assert_eq!(summary.scheduled, 5);
    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert_eq!(checkpoint.len(), 5);
    assert!(checkpoint.values().all(|entry| entry.is_done()));
}

#[test]
fn test_init_failure_is_reported_without_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_png(&input.join("a.png"));
    write_png(&input.join("b.png"));

    let loader = ScriptedLoader {
        failing_gpus: vec![1],
    };
    let summary = run(run_config(&input, &output, vec![0, 1]), loader);

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.failed_workers, vec![1]);
    assert_eq!(summary.abnormal_exits.len(), 1);
    assert_eq!(summary.abnormal_exits[0].gpu, 1);
    assert_eq!(summary.abnormal_exits[0].code, Some(3));

    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert!(checkpoint["a"].is_done());
    assert!(!checkpoint.contains_key("b"));
}

#[test]
fn test_unsupported_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    fs::write(&input, "just text").unwrap();
    let output = dir.path().join("out");

    let summary = run(run_config(&input, &output, vec![0]), ScriptedLoader::default());
    assert_eq!(summary.outcome, RunOutcome::UnsupportedInput);
    assert!(!output.join("checkpoint.json").exists());
}

#[test]
fn test_single_file_uses_parent_as_root() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(&dir.path().join("nested/scan.png"));
    let output = dir.path().join("out");

    run(run_config(&input, &output, vec![0]), ScriptedLoader::default());
    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert!(checkpoint["scan"].is_done());
}

#[test]
fn test_empty_directory_has_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join(".DS_Store"), "x").unwrap();

    let summary = run(run_config(&input, &dir.path().join("out"), vec![0]), ScriptedLoader::default());
    assert_eq!(summary.outcome, RunOutcome::NothingToDo);
    assert_eq!(summary.total_files, 0);
}

#[test]
fn test_corrupted_checkpoint_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_png(&input.join("a.png"));
    fs::create_dir_all(&output).unwrap();
    fs::write(output.join("checkpoint.json"), "{ not json").unwrap();

    let err = Orchestrator::new(
        run_config(&input, &output, vec![0]),
        Box::new(thread_launcher(ScriptedLoader::default())),
    )
    .with_sampler(Box::new(FixedSampler))
    .run()
    .unwrap_err();

    assert!(matches!(err, BatchError::Checkpoint(_)));
    assert!(err.to_string().starts_with("Corrupted checkpoint file detected"));
    assert_eq!(fs::read_to_string(output.join("checkpoint.json")).unwrap(), "{ not json");
}
