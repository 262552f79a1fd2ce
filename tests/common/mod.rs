//! Shared fixtures: scripted models, a synthetic PDF rasterizer and run helpers.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use batch_ocr::core::{BatchError, GpuSelection, RunConfig};
use batch_ocr::domain::{
    DetectionBox, LayoutBox, PageDetection, PageLayout, PageText, TableCell, TableStructure,
    TextLine,
};
use batch_ocr::loader::{LoaderError, PageSet, Rasterizer, RenderedPage, resolve_pages};
use batch_ocr::models::{
    BackendConfig, DetectionModel, LayoutModel, ModelLoadError, ModelLoader, ModelSuite, PageBatch,
    RecognitionModel, RecognitionOptions, TableRecModel,
};
use batch_ocr::monitor::{NoGpu, ResourceSample, ResourceSampler};
use batch_ocr::processors::Rect;
use batch_ocr::worker::{Orchestrator, RunSummary, ThreadLauncher};
use image::{Rgb, RgbImage};

/// Page count of every synthetic PDF.
pub const SYNTHETIC_PAGES: usize = 3;

/// Width and height of a synthetic page at 96 DPI.
pub const BASE_SIZE: u32 = 100;

pub const PDF_STUB: &[u8] = b"%PDF-1.4\n%synthetic\n";

/// Renders any PDF as three blank pages sized proportionally to the DPI.
pub struct SyntheticPdf;

impl Rasterizer for SyntheticPdf {
    fn render(
        &self,
        _path: &Path,
        pages: Option<&PageSet>,
        dpis: &[f32],
    ) -> Result<Vec<RenderedPage>, LoaderError> {
        let indices = resolve_pages(pages, SYNTHETIC_PAGES)?;
        Ok(indices
            .into_iter()
            .map(|idx| RenderedPage {
                number: idx + 1,
                images: dpis
                    .iter()
                    .map(|dpi| {
                        let side = (BASE_SIZE as f32 * dpi / 96.0) as u32;
                        RgbImage::from_pixel(side, side, Rgb([255, 255, 255]))
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Scale of `image` relative to a 96 DPI synthetic page.
fn factor(image: &RgbImage) -> f32 {
    image.width() as f32 / BASE_SIZE as f32
}

fn scaled(image: &RgbImage, x0: f32, y0: f32, x1: f32, y1: f32) -> Rect {
    Rect::new(x0, y0, x1, y1).scale(factor(image), factor(image))
}

/// Deterministic models.
///
/// Every page holds a text region with one line. The second page of a batch
/// adds a picture and the third a 2x2 table whose cells read A, B, C, D.
pub struct ScriptedModels;

impl LayoutModel for ScriptedModels {
    fn predict(&self, batch: &PageBatch<'_>) -> Result<Vec<PageLayout>, BatchError> {
        Ok(batch
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let mut boxes = vec![LayoutBox::new(scaled(image, 10.0, 10.0, 90.0, 40.0), "Text", 0)];
                match idx {
                    1 => boxes.push(LayoutBox::new(scaled(image, 10.0, 50.0, 40.0, 90.0), "Picture", 1)),
                    2 => boxes.push(LayoutBox::new(scaled(image, 50.0, 50.0, 90.0, 90.0), "Table", 1)),
                    _ => {}
                }
                PageLayout::new(boxes, Rect::from_size(image.width(), image.height()))
            })
            .collect())
    }
}

impl DetectionModel for ScriptedModels {
    fn detect(&self, batch: &PageBatch<'_>) -> Result<Vec<PageDetection>, BatchError> {
        Ok(batch
            .images
            .iter()
            .map(|image| PageDetection {
                bboxes: vec![DetectionBox::new(scaled(image, 15.0, 15.0, 75.0, 35.0), 0.95)],
                image_bbox: Rect::from_size(image.width(), image.height()),
            })
            .collect())
    }
}

impl RecognitionModel for ScriptedModels {
    fn recognize(
        &self,
        batch: &PageBatch<'_>,
        _detector: &dyn DetectionModel,
        _options: RecognitionOptions,
    ) -> Result<Vec<PageText>, BatchError> {
        Ok(batch
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let mut lines = vec![TextLine::new(
                    scaled(image, 15.0, 15.0, 75.0, 35.0),
                    format!("page   {} text", idx + 1),
                    0.9,
                )];
                if idx == 2 {
                    for (text, x, y) in [("A", 52.0, 52.0), ("B", 72.0, 52.0), ("C", 52.0, 72.0), ("D", 72.0, 72.0)] {
                        lines.push(TextLine::new(scaled(image, x, y, x + 16.0, y + 16.0), text, 0.8));
                    }
                }
                PageText::new(lines, Rect::from_size(image.width(), image.height()))
            })
            .collect())
    }
}

impl TableRecModel for ScriptedModels {
    fn recognize_tables(&self, crops: &PageBatch<'_>) -> Result<Vec<TableStructure>, BatchError> {
        Ok(crops
            .images
            .iter()
            .map(|crop| {
                let (w, h) = (crop.width() as f32, crop.height() as f32);
                let (hw, hh) = (w / 2.0, h / 2.0);
                TableStructure {
                    rows: Vec::new(),
                    cols: Vec::new(),
                    cells: vec![
                        TableCell::new(Rect::new(0.0, 0.0, hw, hh), 0, 0),
                        TableCell::new(Rect::new(hw, 0.0, w, hh), 0, 1),
                        TableCell::new(Rect::new(0.0, hh, hw, h), 1, 0),
                        TableCell::new(Rect::new(hw, hh, w, h), 1, 1),
                    ],
                    image_bbox: Rect::from_size(crop.width(), crop.height()),
                }
            })
            .collect())
    }
}

/// Loads [`ScriptedModels`], or fails on the listed GPUs.
#[derive(Default)]
pub struct ScriptedLoader {
    pub failing_gpus: Vec<u32>,
}

impl ModelLoader for ScriptedLoader {
    fn load(&self, gpu: u32) -> Result<ModelSuite, ModelLoadError> {
        if self.failing_gpus.contains(&gpu) {
            return Err(ModelLoadError::OutOfMemory {
                gpu,
                message: "CUDA out of memory".into(),
            });
        }
        Ok(ModelSuite {
            layout: Box::new(ScriptedModels),
            detection: Box::new(ScriptedModels),
            recognition: Box::new(ScriptedModels),
            table_rec: Box::new(ScriptedModels),
        })
    }
}

/// A sampler reporting constant usage.
pub struct FixedSampler;

impl ResourceSampler for FixedSampler {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample {
            cpu_percent: 25.0,
            rss_mb: 512.0,
            gpus: Vec::new(),
        }
    }
}

pub fn thread_launcher(loader: ScriptedLoader) -> ThreadLauncher {
    ThreadLauncher::new(Arc::new(loader), Arc::new(|| Box::new(SyntheticPdf) as Box<dyn Rasterizer>))
}

pub fn run_config(input: &Path, output: &Path, gpus: Vec<u32>) -> RunConfig {
    RunConfig::new(
        input,
        output,
        GpuSelection::Devices(gpus),
        BackendConfig::Replay {
            dir: output.join("unused-predictions"),
        },
    )
    .with_poll_interval_ms(10)
    .with_monitor_interval_ms(20)
    .with_show_progress(false)
}

pub fn run(config: RunConfig, loader: ScriptedLoader) -> RunSummary {
    Orchestrator::new(config, Box::new(thread_launcher(loader)))
        .with_telemetry(Box::new(NoGpu))
        .with_sampler(Box::new(FixedSampler))
        .run()
        .unwrap()
}

pub fn write_pdf(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, PDF_STUB).unwrap();
    path.to_path_buf()
}

pub fn write_png(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(BASE_SIZE, BASE_SIZE, Rgb([255, 255, 255]))
        .save(path)
        .unwrap();
    path.to_path_buf()
}

/// A file that sniffs as PNG but does not decode.
pub fn write_corrupt_png(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(b"not really a png");
    fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}
