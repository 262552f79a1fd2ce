//! Core error types for the batch pipeline.
//!
//! This module defines the error types shared by the loader, the model stages,
//! the merge engine and the worker. Checkpoint and model-load failures have
//! their own enums next to the code that raises them and convert into
//! [`BatchError`] where they cross a module boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::loader::LoaderError;

/// Stage of the per-document pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Rasterizing or decoding the input document.
    Loading,
    /// Layout analysis over the low-resolution pages.
    LayoutAnalysis,
    /// Text detection over the low-resolution pages.
    TextDetection,
    /// Text recognition over the high-resolution pages.
    TextRecognition,
    /// Table structure recognition over high-resolution crops.
    TableRecognition,
    /// Associating text lines with layout regions and table cells.
    Merge,
    /// Writing assets, merged structures or raw text.
    Output,
    /// Rendering debug overlays.
    Visualization,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Loading => write!(f, "document loading"),
            ProcessingStage::LayoutAnalysis => write!(f, "layout analysis"),
            ProcessingStage::TextDetection => write!(f, "text detection"),
            ProcessingStage::TextRecognition => write!(f, "text recognition"),
            ProcessingStage::TableRecognition => write!(f, "table recognition"),
            ProcessingStage::Merge => write!(f, "merge"),
            ProcessingStage::Output => write!(f, "output"),
            ProcessingStage::Visualization => write!(f, "visualization"),
        }
    }
}

/// Errors raised while processing documents.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Error occurred while decoding or encoding an image.
    #[error("image: {0}")]
    Image(#[source] image::ImageError),

    /// Error occurred during a pipeline stage.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A model produced output that cannot be used.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        /// The name of the model where inference failed.
        model_name: String,
        /// Additional context about the inference error.
        context: String,
    },

    /// The file is neither a PDF nor a supported raster image.
    #[error("Unsupported file type: {}", path.display())]
    UnsupportedFileType {
        /// Path of the rejected file.
        path: PathBuf,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Document loading failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Checkpoint access failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Rendering a table as CSV failed.
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for BatchError {
    fn from(error: image::ImageError) -> Self {
        Self::Image(error)
    }
}

impl BatchError {
    /// Creates a processing error for `stage` without an underlying source.
    pub fn processing(stage: ProcessingStage, context: impl Into<String>) -> Self {
        Self::Processing {
            kind: stage,
            context: context.into(),
            source: None,
        }
    }

    /// Wraps `source` as a processing error for `stage`.
    pub fn processing_with_source(
        stage: ProcessingStage,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind: stage,
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an inference error attributed to `model_name`.
    pub fn inference(model_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Checks that a model returned one result per input.
    pub fn check_batch_len(
        model_name: &str,
        expected: usize,
        actual: usize,
    ) -> Result<(), BatchError> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::inference(
                model_name,
                format!("expected {expected} results for {expected} inputs, got {actual}"),
            ))
        }
    }
}

/// Renders an error and its sources as a single `a: b: c` line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_display_names_stage() {
        let err = BatchError::processing(ProcessingStage::Merge, "table queue exhausted");
        assert_eq!(err.to_string(), "merge failed: table queue exhausted");
    }

    #[test]
    fn test_check_batch_len() {
        assert!(BatchError::check_batch_len("layout", 3, 3).is_ok());
        let err = BatchError::check_batch_len("layout", 3, 2).unwrap_err();
        assert!(err.to_string().contains("layout"));
        assert!(err.to_string().contains("got 2"));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.png");
        let err = BatchError::processing_with_source(ProcessingStage::Output, "write asset", io);
        let chain = error_chain(&err);
        assert_eq!(chain, "output failed: write asset: missing.png");
    }
}
