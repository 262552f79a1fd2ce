//! The `run` and `worker` commands.

use std::io::Read;
use std::time::Instant;

use batch_ocr::core::{BatchError, RunConfig};
use batch_ocr::loader::PdfiumRasterizer;
use batch_ocr::worker::{
    Orchestrator, ProcessLauncher, RunOutcome, RunSummary, StdoutSink, WorkerError,
    WorkerManifest, exit_code, run_worker,
};
use tracing::{error, info};

/// Exit code of `run` when at least one worker never became ready.
const WORKER_FAILED_EXIT_CODE: i32 = 2;

/// Runs a batch and prints its summary. Returns the process exit code.
pub fn run_batch(config: RunConfig) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();
    config.parallel.install_global_thread_pool()?;

    let input = config.input_path.clone();
    let launcher = ProcessLauncher::current_exe()?;
    let summary = Orchestrator::new(config, Box::new(launcher)).run()?;

    match summary.outcome {
        RunOutcome::UnsupportedInput => {
            println!("Unsupported file type: {}", input.display());
            return Ok(0);
        }
        RunOutcome::NothingToDo => {
            println!(
                "Total files scanned: {}, out of which {} are already processed.",
                summary.total_files, summary.already_done
            );
            return Ok(0);
        }
        RunOutcome::Completed => print_summary(&summary),
    }

    println!(
        "Total execution time for this session: {:.2} seconds",
        start.elapsed().as_secs_f64()
    );

    if summary.failed_workers.is_empty() {
        Ok(0)
    } else {
        error!("Workers on GPUs {:?} failed to initialize", summary.failed_workers);
        Ok(WORKER_FAILED_EXIT_CODE)
    }
}

fn print_summary(summary: &RunSummary) {
    info!(
        "Scheduled {} of {} files ({} already done)",
        summary.scheduled, summary.total_files, summary.already_done
    );

    println!(
        "Total word count across all checkpoints: {}",
        summary.totals.word_count
    );
    match summary.totals.average_time_per_page {
        Some(seconds) => println!("Average time per page: {seconds:.2} seconds"),
        None => println!("No pages processed successfully, cannot compute average time."),
    }

    let resources = &summary.resources;
    println!("Average CPU usage: {:.2}%", resources.cpu_percent);
    println!("Average RAM usage: {:.2} MB", resources.rss_mb);
    println!("Average GPU usage: {:.2}%", resources.gpu_utilization);
    println!("Average VRAM usage: {:.2} MB", resources.gpu_memory_mb);
}

/// Reads a manifest from stdin and processes it, reporting on stdout.
///
/// Returns the worker's exit code.
pub fn run_worker_from_stdin() -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let manifest: WorkerManifest = serde_json::from_str(&input)
        .map_err(|e| BatchError::invalid_input(format!("worker manifest: {e}")))?;

    let loader = manifest.backend.loader();
    let rasterizer = Box::new(PdfiumRasterizer::new());
    let result = run_worker(&manifest, loader.as_ref(), rasterizer, &mut StdoutSink);

    match &result {
        Ok(report) => info!(
            "Worker on GPU {} finished: {} done, {} failed",
            manifest.gpu, report.done, report.failed
        ),
        Err(WorkerError::Init(e)) => error!("Worker on GPU {} failed to load models: {}", manifest.gpu, e),
        Err(WorkerError::Fatal(e)) => error!("Worker on GPU {} stopped: {}", manifest.gpu, e),
    }
    Ok(exit_code(&result))
}
