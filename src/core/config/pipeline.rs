//! Per-document pipeline options shared by the orchestrator and its workers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::constants::{IMAGE_DPI, IMAGE_DPI_HIGHRES};
use crate::core::errors::BatchError;
use crate::loader::PageSet;

/// Options that control what a worker does with each document.
///
/// Serialized into the worker manifest, so every field has a serde default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// DPI for the layout and detection pass.
    #[serde(default = "PipelineOptions::default_low_res_dpi")]
    pub low_res_dpi: f32,

    /// DPI for the recognition and table pass. Output coordinates live in this space.
    #[serde(default = "PipelineOptions::default_high_res_dpi")]
    pub high_res_dpi: f32,

    /// Dump raw per-stage predictions under `debug/`.
    #[serde(default)]
    pub debug: bool,

    /// Render overlays under `images/`.
    #[serde(default)]
    pub save_images: bool,

    /// Enable mathematical-notation recognition.
    #[serde(default = "PipelineOptions::default_math_mode")]
    pub math_mode: bool,

    /// Restrict PDFs to these 1-based pages.
    #[serde(default)]
    pub pages: Option<PageSet>,

    /// Directory holding (or receiving) the rendering font.
    #[serde(default)]
    pub font_dir: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_save_images(mut self, save_images: bool) -> Self {
        self.save_images = save_images;
        self
    }

    pub fn with_math_mode(mut self, math_mode: bool) -> Self {
        self.math_mode = math_mode;
        self
    }

    pub fn with_pages(mut self, pages: Option<PageSet>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_font_dir(mut self, font_dir: Option<PathBuf>) -> Self {
        self.font_dir = font_dir;
        self
    }

    pub fn with_dpi(mut self, low_res_dpi: f32, high_res_dpi: f32) -> Self {
        self.low_res_dpi = low_res_dpi;
        self.high_res_dpi = high_res_dpi;
        self
    }

    /// Rejects DPI settings that cannot produce a usable page pair.
    pub fn validate(&self) -> Result<(), BatchError> {
        if !(self.low_res_dpi.is_finite() && self.low_res_dpi > 0.0) {
            return Err(BatchError::config_error(format!(
                "low_res_dpi must be positive, got {}",
                self.low_res_dpi
            )));
        }
        if !(self.high_res_dpi.is_finite() && self.high_res_dpi >= self.low_res_dpi) {
            return Err(BatchError::config_error(format!(
                "high_res_dpi ({}) must be at least low_res_dpi ({})",
                self.high_res_dpi, self.low_res_dpi
            )));
        }
        Ok(())
    }

    fn default_low_res_dpi() -> f32 {
        IMAGE_DPI
    }

    fn default_high_res_dpi() -> f32 {
        IMAGE_DPI_HIGHRES
    }

    fn default_math_mode() -> bool {
        true
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            low_res_dpi: Self::default_low_res_dpi(),
            high_res_dpi: Self::default_high_res_dpi(),
            debug: false,
            save_images: false,
            math_mode: Self::default_math_mode(),
            pages: None,
            font_dir: None,
        }
    }
}
