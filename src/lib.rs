//! # batch-ocr
//!
//! Batch OCR over directories of PDFs and page images, spread across GPUs.
//!
//! Every document runs through four models: layout analysis on a
//! low-resolution rendering, text detection, text recognition on a
//! high-resolution rendering and table structure recognition on table crops.
//! The merge engine then attaches each recognized line to the layout region
//! (or table cell) containing its center. Results land in a per-run output
//! directory next to a checkpoint that makes reruns resumable.
//!
//! ## Modules
//!
//! * [`core`] - Configuration, constants and errors
//! * [`domain`] - Layout, text, table and merged page types
//! * [`loader`] - Rasterization of PDFs and images at two DPIs
//! * [`models`] - Model traits and the backends that implement them
//! * [`pipeline`] - Per-document stages, merge and output files
//! * [`checkpoint`] - The shared, lock-protected progress ledger
//! * [`monitor`] - CPU, RAM and GPU sampling during a run
//! * [`worker`] - Per-GPU workers and the orchestrator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batch_ocr::core::{GpuSelection, RunConfig};
//! use batch_ocr::models::{BackendConfig, OnnxConfig};
//! use batch_ocr::worker::{Orchestrator, ProcessLauncher};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new(
//!     "scans/",
//!     "results/",
//!     GpuSelection::Devices(vec![0, 1]),
//!     BackendConfig::Onnx(OnnxConfig::new("models/")),
//! );
//! let launcher = ProcessLauncher::current_exe()?;
//! let summary = Orchestrator::new(config, Box::new(launcher)).run()?;
//! println!("{} words", summary.totals.word_count);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod core;
pub mod domain;
pub mod loader;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod processors;
pub mod utils;
pub mod worker;
