//! Conversion of command-line arguments into library configuration.

use std::path::PathBuf;

use batch_ocr::core::{BatchError, GpuSelection, ParallelPolicy, PipelineOptions, RunConfig};
use batch_ocr::loader::PageSet;
use batch_ocr::models::{BackendConfig, OnnxConfig};

/// Arguments of the `run` command.
pub struct RunArgs {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub gpus: String,
    pub page_range: Option<String>,
    pub debug: bool,
    pub save_images: bool,
    pub models: PathBuf,
    pub cpu: bool,
    pub predictions: Option<PathBuf>,
    pub math_mode: bool,
    pub poll_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub font_dir: Option<PathBuf>,
    pub threads: Option<usize>,
}

impl RunArgs {
    pub fn into_run_config(self) -> Result<RunConfig, BatchError> {
        let gpus: GpuSelection = self.gpus.parse()?;
        let pages = self
            .page_range
            .as_deref()
            .map(str::parse::<PageSet>)
            .transpose()
            .map_err(|e| BatchError::config_error(format!("invalid page range: {e}")))?;

        let options = PipelineOptions::new()
            .with_debug(self.debug)
            .with_save_images(self.save_images)
            .with_math_mode(self.math_mode)
            .with_pages(pages)
            .with_font_dir(self.font_dir);

        let backend = match self.predictions {
            Some(dir) => BackendConfig::Replay { dir },
            None => BackendConfig::Onnx(
                OnnxConfig::new(self.models)
                    .with_use_cuda(!self.cpu)
                    .with_intra_threads(self.threads),
            ),
        };

        let config = RunConfig::new(self.input_path, self.output_dir, gpus, backend)
            .with_options(options)
            .with_parallel(ParallelPolicy::new().with_max_threads(self.threads))
            .with_poll_interval_ms(self.poll_interval_ms)
            .with_monitor_interval_ms(self.monitor_interval_ms);

        Ok(config)
    }
}
