//! End-to-end runs over synthetic PDFs through the in-process launcher.

mod common;

use std::collections::BTreeMap;

use batch_ocr::checkpoint::{CheckpointStatus, CheckpointStore};
use batch_ocr::core::PipelineOptions;
use batch_ocr::domain::MergedPage;
use batch_ocr::loader::PageSet;
use batch_ocr::worker::RunOutcome;
use common::*;

#[test]
fn test_three_page_pdf_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_pdf(&input.join("reports/q1.pdf"));

    let config = run_config(&input, &output, vec![0])
        .with_options(PipelineOptions::new().with_debug(true));
    let summary = run(config, ScriptedLoader::default());

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.total_files, 1);
    assert_eq!(summary.scheduled, 1);
    assert!(summary.failed_workers.is_empty());
    assert!(summary.abnormal_exits.is_empty());
    // Nine words of text lines plus the two tokens of the table markup.
    assert_eq!(summary.totals.word_count, 11);
    assert!(summary.totals.average_time_per_page.is_some());
    assert_eq!(summary.resources.cpu_percent, 25.0);

    let id = "reports↳q1";
    assert!(output.join("assets").join(id).join("2_Picture_1.png").is_file());

    let merged: BTreeMap<String, Vec<MergedPage>> =
        serde_json::from_value(read_json(&output.join("with_layout").join(format!("{id}.json")))).unwrap();
    let pages = &merged[id];
    assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), [1, 2, 3]);

    assert_eq!(pages.iter().map(|p| p.bboxes.len()).collect::<Vec<_>>(), [1, 2, 2]);
    let text_lines = pages[0].bboxes[0].text_lines.as_ref().unwrap();
    assert_eq!(text_lines.len(), 1);
    assert_eq!(text_lines[0].text, "page   1 text");
    assert_eq!(pages[1].bboxes[1].text_lines.as_deref(), Some(&[][..]));

    let tables: Vec<_> = pages.iter().flat_map(|p| p.tables()).collect();
    assert_eq!(tables.len(), 1);
    let cell_texts: Vec<_> = tables[0]
        .structure
        .cells
        .iter()
        .map(|c| c.text.clone().unwrap_or_default())
        .collect();
    assert_eq!(cell_texts, ["A", "B", "C", "D"]);
    assert_eq!(tables[0].page, 3);

    let raw = read_json(&output.join("raw").join(format!("{id}_raw_text.json")));
    assert_eq!(raw["word_count"], 11);
    assert_eq!(raw["pages"][format!("{id}↳1")], "page 1 text ");
    let page_three = raw["pages"][format!("{id}↳3")].as_str().unwrap();
    assert!(page_three.starts_with("page 3 text <@Table>"));
    assert!(page_three.ends_with("</@Table> \n"));

    for stage in ["layout", "detection", "text", "tables"] {
        assert!(output.join("debug").join(format!("{id}_{stage}.json")).is_file(), "{stage}");
    }

    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    let entry = &checkpoint[id];
    assert_eq!(entry.status, CheckpointStatus::Done);
    assert_eq!(entry.num_pages, Some(3));
    assert_eq!(entry.word_count, Some(11));
    assert!(entry.error.is_none());
}

#[test]
fn test_page_range_limits_rendered_pages() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_pdf(&input.join("book.pdf"));

    let pages: PageSet = "2-3".parse().unwrap();
    let config = run_config(&input, &output, vec![0])
        .with_options(PipelineOptions::new().with_pages(Some(pages)));
    run(config, ScriptedLoader::default());

    let merged: BTreeMap<String, Vec<MergedPage>> =
        serde_json::from_value(read_json(&output.join("with_layout/book.json"))).unwrap();
    assert_eq!(merged["book"].iter().map(|p| p.page).collect::<Vec<_>>(), [2, 3]);
    assert!(output.join("assets/book/3_Picture_1.png").is_file());
    assert!(!output.join("debug").exists());

    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert_eq!(checkpoint["book"].num_pages, Some(2));
}

#[test]
fn test_page_past_end_fails_document() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("short.pdf");
    let output = dir.path().join("out");
    write_pdf(&input);

    let pages: PageSet = "2-5".parse().unwrap();
    let config = run_config(&input, &output, vec![0])
        .with_options(PipelineOptions::new().with_pages(Some(pages)));
    let summary = run(config, ScriptedLoader::default());

    assert_eq!(summary.outcome, RunOutcome::Completed);
    let checkpoint = CheckpointStore::new(output.join("checkpoint.json")).read().unwrap();
    assert_eq!(checkpoint["short"].status, CheckpointStatus::Error);
    assert!(checkpoint["short"].error.as_deref().unwrap().contains("out of range"));
    assert_eq!(summary.totals.average_time_per_page, None);
}

#[test]
fn test_rerun_skips_completed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_pdf(&input.join("a.pdf"));
    write_pdf(&input.join("b.pdf"));

    let first = run(run_config(&input, &output, vec![0, 1]), ScriptedLoader::default());
    assert_eq!(first.scheduled, 2);
    assert_eq!(first.already_done, 0);

    let before = std::fs::read_to_string(output.join("checkpoint.json")).unwrap();
    let second = run(run_config(&input, &output, vec![0, 1]), ScriptedLoader::default());
    assert_eq!(second.outcome, RunOutcome::NothingToDo);
    assert_eq!(second.total_files, 2);
    assert_eq!(second.already_done, 2);
    assert_eq!(second.scheduled, 0);
    assert_eq!(std::fs::read_to_string(output.join("checkpoint.json")).unwrap(), before);
}
