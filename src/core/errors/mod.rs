//! Error handling for the batch pipeline.

mod types;

pub use types::{BatchError, ProcessingStage, error_chain};

/// Convenience alias used across the library.
pub type BatchResult<T> = Result<T, BatchError>;
