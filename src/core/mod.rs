//! The core module of the batch pipeline.
//!
//! This module contains the pieces every other module leans on:
//! - Configuration types
//! - Constants used throughout the pipeline
//! - Error handling

pub mod config;
pub mod constants;
pub mod errors;

pub use config::{GpuSelection, ParallelPolicy, PipelineOptions, RunConfig};
pub use constants::*;
pub use errors::{BatchError, BatchResult, ProcessingStage, error_chain};
