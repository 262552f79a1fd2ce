//! Configuration of one orchestrated run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{GpuSelection, ParallelPolicy, PipelineOptions};
use crate::core::constants::{DEFAULT_MONITOR_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS};
use crate::core::errors::BatchError;
use crate::models::BackendConfig;

/// Everything the orchestrator needs to run a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// A directory to walk, or a single file.
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub gpus: GpuSelection,
    pub backend: BackendConfig,

    #[serde(default)]
    pub options: PipelineOptions,

    #[serde(default)]
    pub parallel: ParallelPolicy,

    /// Progress refresh interval.
    #[serde(default = "RunConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Resource sampling interval.
    #[serde(default = "RunConfig::default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Draw progress bars on stderr.
    #[serde(default = "RunConfig::default_show_progress")]
    pub show_progress: bool,
}

impl RunConfig {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        gpus: GpuSelection,
        backend: BackendConfig,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            gpus,
            backend,
            options: PipelineOptions::default(),
            parallel: ParallelPolicy::default(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            monitor_interval_ms: Self::default_monitor_interval_ms(),
            show_progress: Self::default_show_progress(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelPolicy) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_monitor_interval_ms(mut self, ms: u64) -> Self {
        self.monitor_interval_ms = ms;
        self
    }

    pub fn with_show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        self.options.validate()?;
        if !self.input_path.exists() {
            return Err(BatchError::invalid_input(format!(
                "input path does not exist: {}",
                self.input_path.display()
            )));
        }
        Ok(())
    }

    fn default_poll_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }

    fn default_monitor_interval_ms() -> u64 {
        DEFAULT_MONITOR_INTERVAL_MS
    }

    fn default_show_progress() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults_from_json() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "input_path": "in",
                "output_dir": "out",
                "gpus": {"Devices": [0, 1]},
                "backend": {"kind": "replay", "dir": "preds"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.gpus, GpuSelection::Devices(vec![0, 1]));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.monitor_interval(), Duration::from_millis(1000));
        assert!(config.show_progress);
        assert!(config.options.math_mode);
    }

    #[test]
    fn test_validate_rejects_missing_input() {
        let config = RunConfig::new(
            "/definitely/not/here",
            "out",
            GpuSelection::All,
            BackendConfig::Replay { dir: "preds".into() },
        );
        assert!(config.validate().is_err());
    }
}
