//! batch-ocr
//!
//! Runs layout-aware OCR over a directory of PDFs and page images, one
//! worker process per GPU.
//!
//! # Usage
//!
//! ```bash
//! batch-ocr run -i scans/ -o results/ -g 0,1 --models models/
//! batch-ocr run -i scans/report.pdf -o results/ -g all -p 1-3,7 -s
//! batch-ocr run -i scans/ -o rerun/ -g 0 --predictions results/debug/
//! ```
//!
//! `--models` names a directory of ONNX models (`layout.onnx`, `det.onnx`,
//! `rec.onnx`, `table.onnx` and their dictionaries). With `--predictions`
//! the models are replaced by stage dumps recorded with `-d`.
//!
//! Progress bars and logs go to stderr. Set `RUST_LOG=batch_ocr=debug` for
//! per-stage timings.

mod cli;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RunArgs;

#[derive(Parser)]
#[command(name = "batch-ocr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-GPU batch OCR with layout-aware merging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a file or a directory tree
    Run {
        /// File or directory to process
        #[arg(short = 'i', long = "input-path", env = "BATCH_OCR_INPUT_PATH")]
        input_path: PathBuf,

        /// Directory receiving results and the checkpoint
        #[arg(short = 'o', long = "output-dir", env = "BATCH_OCR_OUTPUT_DIR")]
        output_dir: PathBuf,

        /// GPUs to use: `all` or comma-separated ordinals
        #[arg(short = 'g', long, env = "BATCH_OCR_GPUS")]
        gpus: String,

        /// PDF pages to process, e.g. `1-3,7`
        #[arg(short = 'p', long = "page-range", env = "BATCH_OCR_PAGE_RANGE")]
        page_range: Option<String>,

        /// Dump per-stage predictions under debug/
        #[arg(short = 'd', long, env = "BATCH_OCR_DEBUG")]
        debug: bool,

        /// Render overlays under images/
        #[arg(short = 's', long = "save-images", env = "BATCH_OCR_SAVE_IMAGES")]
        save_images: bool,

        /// Directory of ONNX models and dictionaries
        #[arg(short = 'm', long, default_value = "models", env = "BATCH_OCR_MODELS")]
        models: PathBuf,

        /// Run the ONNX models on the CPU execution provider
        #[arg(long, env = "BATCH_OCR_CPU")]
        cpu: bool,

        /// Serve stage dumps from this directory instead of running models
        #[arg(long, env = "BATCH_OCR_PREDICTIONS")]
        predictions: Option<PathBuf>,

        /// Disable mathematical-notation recognition
        #[arg(long = "no-math-mode")]
        no_math_mode: bool,

        /// Progress refresh interval in milliseconds
        #[arg(long = "poll-interval-ms", default_value_t = 500, env = "BATCH_OCR_POLL_INTERVAL_MS")]
        poll_interval_ms: u64,

        /// Resource sampling interval in milliseconds
        #[arg(long = "monitor-interval-ms", default_value_t = 1000, env = "BATCH_OCR_MONITOR_INTERVAL_MS")]
        monitor_interval_ms: u64,

        /// Directory holding the rendering font
        #[arg(long = "font-dir", env = "BATCH_OCR_FONT_DIR")]
        font_dir: Option<PathBuf>,

        /// Size of the rayon thread pool
        #[arg(long, env = "BATCH_OCR_THREADS")]
        threads: Option<usize>,
    },
    /// Process a manifest read from stdin (spawned by `run`)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    batch_ocr::utils::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input_path,
            output_dir,
            gpus,
            page_range,
            debug,
            save_images,
            models,
            cpu,
            predictions,
            no_math_mode,
            poll_interval_ms,
            monitor_interval_ms,
            font_dir,
            threads,
        } => {
            let args = RunArgs {
                input_path,
                output_dir,
                gpus,
                page_range,
                debug,
                save_images,
                models,
                cpu,
                predictions,
                math_mode: !no_math_mode,
                poll_interval_ms,
                monitor_interval_ms,
                font_dir,
                threads,
            };
            let code = cli::run_batch(args.into_run_config()?)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Worker => {
            let code = cli::run_worker_from_stdin()?;
            std::process::exit(code);
        }
    }

    Ok(())
}
