//! The four model stages of the per-document pipeline.
//!
//! Layout and detection run on the low-resolution pages, recognition and
//! table structure on the high-resolution ones. Each stage checks that its
//! model answered once per input and, in debug mode, dumps the raw answer.

use image::RgbImage;
use tracing::{debug, warn};

use super::PipelineContext;
use super::output::{STAGE_DETECTION, STAGE_LAYOUT, STAGE_TABLES, STAGE_TEXT, save_image, write_document_json};
use crate::core::errors::{BatchError, ProcessingStage};
use crate::domain::{DocumentJob, PageDetection, PageLayout, PageText, RecognizedTable};
use crate::loader::PageImages;
use crate::models::{PageBatch, RecognitionOptions};
use crate::processors::Rect;
use crate::utils::BBoxCrop;

/// Runs layout analysis over the low-resolution pages.
///
/// Returned layouts are in low-resolution coordinates and carry their page
/// numbers. Figure regions are cropped from the low-resolution page and
/// written as assets.
pub fn analyze_layout(
    ctx: &PipelineContext,
    job: &DocumentJob,
    pages: &PageImages,
) -> Result<Vec<PageLayout>, BatchError> {
    let mut layouts = ctx.models.layout.predict(&PageBatch::new(&job.id, &pages.low))?;
    BatchError::check_batch_len("layout", pages.len(), layouts.len())?;

    for ((layout, &number), image) in layouts.iter_mut().zip(&pages.numbers).zip(&pages.low) {
        layout.page = number;
        for region in layout.figures() {
            let asset = ctx.output.asset_path(&job.id, number, &region.label, region.position);
            match BBoxCrop::crop_rect(image, &region.bbox) {
                Ok(crop) => save_image(&asset, &crop)?,
                Err(e) => warn!("Skipping asset {}: {}", asset.display(), e),
            }
        }
    }

    if ctx.options.debug {
        write_document_json(&ctx.output.debug_path(&job.id, STAGE_LAYOUT), &job.id, &layouts)?;
    }
    Ok(layouts)
}

/// Maps low-resolution layouts onto the high-resolution pages.
pub fn rescale_layouts(layouts: &[PageLayout], pages: &PageImages) -> Vec<PageLayout> {
    layouts
        .iter()
        .enumerate()
        .map(|(idx, layout)| {
            let (sx, sy) = pages.scale_factors(idx);
            layout.scaled(sx, sy)
        })
        .collect()
}

/// Runs text detection over the low-resolution pages.
pub fn detect_text(
    ctx: &PipelineContext,
    job: &DocumentJob,
    pages: &PageImages,
) -> Result<Vec<PageDetection>, BatchError> {
    let detections = ctx.models.detection.detect(&PageBatch::new(&job.id, &pages.low))?;
    BatchError::check_batch_len("detection", pages.len(), detections.len())?;

    if ctx.options.debug {
        write_document_json(&ctx.output.debug_path(&job.id, STAGE_DETECTION), &job.id, &detections)?;
    }
    Ok(detections)
}

/// Runs text recognition over the high-resolution pages.
pub fn recognize_text(
    ctx: &PipelineContext,
    job: &DocumentJob,
    pages: &PageImages,
) -> Result<Vec<PageText>, BatchError> {
    let options = RecognitionOptions {
        math_mode: ctx.options.math_mode,
    };
    let texts = ctx.models.recognition.recognize(
        &PageBatch::new(&job.id, &pages.high),
        ctx.models.detection.as_ref(),
        options,
    )?;
    BatchError::check_batch_len("recognition", pages.len(), texts.len())?;

    if ctx.options.debug {
        write_document_json(&ctx.output.debug_path(&job.id, STAGE_TEXT), &job.id, &texts)?;
    }
    Ok(texts)
}

/// Recognized tables with the crops they were recognized from.
#[derive(Debug, Default)]
pub struct TableStage {
    /// In document order: page by page, then layout order within a page.
    pub tables: Vec<RecognizedTable>,
    pub crops: Vec<RgbImage>,
}

/// Crops every table region from the high-resolution pages and recognizes
/// all of them in one batched call.
///
/// `layouts` must already be in high-resolution coordinates.
pub fn recognize_tables(
    ctx: &PipelineContext,
    job: &DocumentJob,
    layouts: &[PageLayout],
    pages: &PageImages,
) -> Result<TableStage, BatchError> {
    let mut crops = Vec::new();
    let mut origins: Vec<(usize, usize, Rect)> = Vec::new();

    for (layout, image) in layouts.iter().zip(&pages.high) {
        for (table_idx, region) in layout.tables().enumerate() {
            let crop = BBoxCrop::crop_rect(image, &region.bbox).map_err(|e| {
                BatchError::processing_with_source(
                    ProcessingStage::TableRecognition,
                    format!("crop table {table_idx} on page {}", layout.page),
                    e,
                )
            })?;
            crops.push(crop);
            origins.push((layout.page, table_idx, region.bbox));
        }
    }

    if crops.is_empty() {
        debug!("No tables in {}", job.id);
        return Ok(TableStage::default());
    }

    let structures = ctx.models.table_rec.recognize_tables(&PageBatch::new(&job.id, &crops))?;
    BatchError::check_batch_len("table_rec", crops.len(), structures.len())?;

    let tables: Vec<RecognizedTable> = origins
        .into_iter()
        .zip(structures)
        .map(|((page, table_idx, region), structure)| {
            RecognizedTable::from_crop(page, table_idx, &region, structure)
        })
        .collect();

    if ctx.options.debug {
        write_document_json(&ctx.output.debug_path(&job.id, STAGE_TABLES), &job.id, &tables)?;
    }
    Ok(TableStage { tables, crops })
}
