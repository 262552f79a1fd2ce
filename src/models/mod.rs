//! Model interfaces consumed by the pipeline.
//!
//! A worker owns exactly one [`ModelSuite`] for its whole life: the four
//! models are loaded once, on the worker's GPU, by a [`ModelLoader`], and the
//! suite is passed explicitly to every stage. Inference backends plug in by
//! implementing the four model traits and a loader for them. Two ship here:
//! [`onnx`] runs Paddle-exported models on ONNX Runtime, and the replay
//! backend serves stage dumps recorded by an earlier run.

pub mod onnx;
mod replay;

pub use onnx::{OnnxConfig, OnnxLoader};
pub use replay::{ReplayLoader, ReplayModels};

use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::errors::BatchError;
use crate::domain::{DocumentId, PageDetection, PageLayout, PageText, TableStructure};

/// A batch of images belonging to one document.
///
/// For the page-level models `images` holds one image per page; for table
/// recognition it holds one crop per table region.
#[derive(Debug, Clone, Copy)]
pub struct PageBatch<'a> {
    pub document_id: &'a DocumentId,
    pub images: &'a [RgbImage],
}

impl<'a> PageBatch<'a> {
    pub fn new(document_id: &'a DocumentId, images: &'a [RgbImage]) -> Self {
        Self {
            document_id,
            images,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Options forwarded to the recognition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// Recognize mathematical notation.
    pub math_mode: bool,
}

/// Detects labeled layout regions. One [`PageLayout`] per input image.
pub trait LayoutModel {
    fn predict(&self, batch: &PageBatch<'_>) -> Result<Vec<PageLayout>, BatchError>;
}

/// Detects candidate text regions. One [`PageDetection`] per input image.
pub trait DetectionModel {
    fn detect(&self, batch: &PageBatch<'_>) -> Result<Vec<PageDetection>, BatchError>;
}

/// Recognizes text lines, refining detection at the batch's resolution.
pub trait RecognitionModel {
    fn recognize(
        &self,
        batch: &PageBatch<'_>,
        detector: &dyn DetectionModel,
        options: RecognitionOptions,
    ) -> Result<Vec<PageText>, BatchError>;
}

/// Recognizes table structure. One [`TableStructure`] per crop, crop-local coordinates.
pub trait TableRecModel {
    fn recognize_tables(&self, crops: &PageBatch<'_>) -> Result<Vec<TableStructure>, BatchError>;
}

/// The four models owned by one worker.
pub struct ModelSuite {
    pub layout: Box<dyn LayoutModel>,
    pub detection: Box<dyn DetectionModel>,
    pub recognition: Box<dyn RecognitionModel>,
    pub table_rec: Box<dyn TableRecModel>,
}

/// Why a worker could not load its models.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("out of memory loading models on GPU {gpu}: {message}")]
    OutOfMemory { gpu: u32, message: String },

    #[error("failed to load models on GPU {gpu}: {message}")]
    Failed { gpu: u32, message: String },
}

impl ModelLoadError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ModelLoadError::OutOfMemory { .. })
    }
}

/// Builds a worker's [`ModelSuite`] on a given GPU.
pub trait ModelLoader: Send + Sync {
    fn load(&self, gpu: u32) -> Result<ModelSuite, ModelLoadError>;
}

/// Model backend selection, carried in the worker manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Run ONNX models on the worker's GPU.
    Onnx(OnnxConfig),
    /// Serve predictions from stage dumps in `dir`.
    Replay { dir: PathBuf },
}

impl BackendConfig {
    pub fn loader(&self) -> Box<dyn ModelLoader> {
        match self {
            BackendConfig::Onnx(config) => Box::new(OnnxLoader::new(config.clone())),
            BackendConfig::Replay { dir } => Box::new(ReplayLoader::new(dir)),
        }
    }
}
