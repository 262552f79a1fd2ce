//! ONNX Runtime session handling shared by the four models.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ndarray::{Array, Dimension};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use tracing::debug;

use crate::core::errors::BatchError;
use crate::models::ModelLoadError;

/// Allocation failures reported by ONNX Runtime and the CUDA provider.
const OUT_OF_MEMORY_MARKERS: &[&str] = &[
    "out of memory",
    "cuda_error_out_of_memory",
    "cudaerrormemoryallocation",
    "failed to allocate memory",
    "bfcarena",
];

/// How sessions are placed on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// CUDA device the sessions run on.
    pub device: u32,
    pub use_cuda: bool,
    /// Cap on the CUDA memory arena, in bytes.
    pub gpu_mem_limit: Option<usize>,
    pub intra_threads: Option<usize>,
}

impl SessionOptions {
    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        #[cfg(feature = "cuda")]
        if self.use_cuda {
            let mut cuda = ort::execution_providers::CUDAExecutionProvider::default()
                .with_device_id(self.device as i32);
            if let Some(limit) = self.gpu_mem_limit {
                cuda = cuda.with_memory_limit(limit);
            }
            providers.push(cuda.build().error_on_failure());
        }

        #[cfg(not(feature = "cuda"))]
        if self.use_cuda {
            tracing::warn!(
                "GPU {}: built without the `cuda` feature, running models on the CPU",
                self.device
            );
        }

        providers.push(CPUExecutionProvider::default().build());
        providers
    }
}

/// One ONNX Runtime session.
///
/// `Session::run` takes `&mut self`, so the session sits behind a mutex and
/// the model traits can stay `&self`.
pub struct OnnxSession {
    name: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession").field("name", &self.name).finish()
    }
}

impl OnnxSession {
    /// Opens the model at `path` on the device named by `options`.
    pub fn open(path: &Path, options: &SessionOptions) -> Result<Self, ort::Error> {
        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = options.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }
        let session = builder
            .with_execution_providers(options.execution_providers())?
            .commit_from_file(path)?;

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("GPU {}: opened session '{}'", options.device, name);

        Ok(Self {
            name,
            session: Mutex::new(session),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locks the session for one `run` call.
    pub fn lock(&self) -> Result<MutexGuard<'_, Session>, BatchError> {
        self.session
            .lock()
            .map_err(|_| BatchError::inference(&self.name, "session lock poisoned"))
    }

    /// Whether the model declares an input called `name`.
    pub fn has_input(&self, name: &str) -> Result<bool, BatchError> {
        Ok(self.lock()?.inputs.iter().any(|input| input.name == name))
    }

    /// Wraps an ONNX Runtime error raised by this session.
    pub fn error(&self, context: &str, error: ort::Error) -> BatchError {
        BatchError::inference(&self.name, format!("{context}: {error}"))
    }
}

/// Borrows `array` as an input tensor.
pub fn tensor_view<D: Dimension + 'static>(array: &Array<f32, D>) -> Result<TensorRef<'_, f32>, ort::Error> {
    TensorRef::from_array_view(array.view())
}

/// Turns a session-creation failure on `gpu` into a [`ModelLoadError`].
///
/// Allocation failures map to [`ModelLoadError::OutOfMemory`] so the
/// orchestrator can tell an exhausted device from a broken model.
pub fn classify_load_error(gpu: u32, message: String) -> ModelLoadError {
    let lower = message.to_lowercase();
    if OUT_OF_MEMORY_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ModelLoadError::OutOfMemory { gpu, message }
    } else {
        ModelLoadError::Failed { gpu, message }
    }
}
