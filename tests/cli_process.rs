//! Runs the `batch-ocr` binary, which spawns one worker process per GPU.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use batch_ocr::checkpoint::{CheckpointStatus, CheckpointStore};
use batch_ocr::domain::{LayoutBox, PageLayout, PageText, TextLine};
use batch_ocr::processors::Rect;
use image::{Rgb, RgbImage};
use serde_json::json;

const BIN: &str = env!("CARGO_BIN_EXE_batch-ocr");
const DEADLINE: Duration = Duration::from_secs(60);

struct Workspace {
    _dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    predictions: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    fs::create_dir_all(&input).unwrap();
    RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]))
        .save(input.join("scan.png"))
        .unwrap();
    Workspace {
        input,
        output: dir.path().join("out"),
        predictions: dir.path().join("preds"),
        _dir: dir,
    }
}

fn write_dump(dir: &Path, stage: &str, pages: serde_json::Value) {
    fs::create_dir_all(dir).unwrap();
    let body = serde_json::to_vec(&json!({ "scan": pages })).unwrap();
    fs::write(dir.join(format!("scan_{stage}.json")), body).unwrap();
}

fn spawn(ws: &Workspace, extra: &[&str]) -> Child {
    Command::new(BIN)
        .arg("run")
        .arg("-i")
        .arg(&ws.input)
        .arg("-o")
        .arg(&ws.output)
        .args(["-g", "0", "--poll-interval-ms", "10", "--monitor-interval-ms", "20"])
        .args(extra)
        .env_remove("BATCH_OCR_PREDICTIONS")
        .env_remove("BATCH_OCR_MODELS")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .unwrap()
}

/// Waits for `child`, killing it and failing the test past [`DEADLINE`].
fn wait(mut child: Child) -> ExitStatus {
    let deadline = Instant::now() + DEADLINE;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("batch-ocr still running after {DEADLINE:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn scan_is_done(output: &Path) -> bool {
    let path = output.join("checkpoint.json");
    path.exists()
        && CheckpointStore::new(path)
            .read()
            .unwrap()
            .get("scan")
            .is_some_and(|entry| entry.is_done())
}

#[test]
fn test_run_replays_recorded_predictions() {
    let ws = workspace();
    let layout = PageLayout::new(
        vec![LayoutBox::new(Rect::new(4.0, 4.0, 60.0, 30.0), "Text", 0)],
        Rect::from_size(64, 64),
    );
    let text = PageText::new(
        vec![TextLine::new(Rect::new(6.0, 8.0, 50.0, 20.0), "hello world", 0.9)],
        Rect::from_size(64, 64),
    );
    write_dump(&ws.predictions, "layout", json!([layout]));
    write_dump(&ws.predictions, "text", json!([text]));

    let predictions = ws.predictions.to_str().unwrap().to_string();
    let status = wait(spawn(&ws, &["--predictions", &predictions]));

    assert_eq!(status.code(), Some(0));
    let checkpoint = CheckpointStore::new(ws.output.join("checkpoint.json")).read().unwrap();
    let entry = &checkpoint["scan"];
    assert_eq!(entry.status, CheckpointStatus::Done);
    assert_eq!(entry.num_pages, Some(1));
    assert_eq!(entry.word_count, Some(2));
    assert!(ws.output.join("with_layout").join("scan.json").is_file());
}

#[test]
fn test_missing_predictions_fail_worker_init() {
    let ws = workspace();
    let missing = ws.predictions.join("absent");

    let status = wait(spawn(&ws, &["--predictions", missing.to_str().unwrap()]));

    assert_eq!(status.code(), Some(2));
    assert!(!scan_is_done(&ws.output));
}

#[test]
fn test_incomplete_model_dir_fails_worker_init() {
    let ws = workspace();
    let models = ws.predictions.join("models");
    fs::create_dir_all(&models).unwrap();
    fs::write(models.join("layout.onnx"), b"").unwrap();

    let status = wait(spawn(&ws, &["--models", models.to_str().unwrap(), "--cpu"]));

    assert_eq!(status.code(), Some(2));
    assert!(!scan_is_done(&ws.output));
}
