//! The per-document pipeline.
//!
//! [`process_document`] takes one file from bytes on disk to merged output:
//!
//! 1. load the pages twice, at the low and the high DPI;
//! 2. layout analysis and text detection on the low-resolution pages;
//! 3. text recognition on the high-resolution pages;
//! 4. table structure recognition on high-resolution table crops;
//! 5. merge text into layout regions and table cells;
//! 6. write the merged structure and the flattened raw text.
//!
//! Any failure aborts the document only. The caller records it in the
//! checkpoint and moves on to the next file.

pub mod extract;
pub mod merge;
pub mod output;
pub mod stages;
#[cfg(feature = "visualization")]
pub mod visualize;

pub use extract::{RawText, clean_text};
pub use merge::merge_document;
pub use output::OutputLayout;

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::PipelineOptions;
use crate::core::errors::{BatchError, error_chain};
use crate::domain::{DocumentJob, DocumentKind, mean_or_zero};
use crate::loader::DocumentLoader;
use crate::models::ModelSuite;

/// Everything a worker needs to process documents.
pub struct PipelineContext {
    pub models: ModelSuite,
    pub loader: DocumentLoader,
    pub output: OutputLayout,
    pub options: PipelineOptions,
    #[cfg(feature = "visualization")]
    overlays: Option<visualize::OverlayRenderer>,
}

impl PipelineContext {
    pub fn new(
        models: ModelSuite,
        loader: DocumentLoader,
        output: OutputLayout,
        options: PipelineOptions,
    ) -> Self {
        #[cfg(feature = "visualization")]
        let overlays = options
            .save_images
            .then(|| visualize::OverlayRenderer::from_font_dir(options.font_dir.as_deref()));
        #[cfg(not(feature = "visualization"))]
        if options.save_images {
            tracing::warn!("save-images requested but overlays are not compiled in");
        }

        Self {
            models,
            loader,
            output,
            options,
            #[cfg(feature = "visualization")]
            overlays,
        }
    }
}

/// Result of a successfully processed document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub word_count: usize,
    pub num_pages: usize,
    /// Mean over pages of the mean line confidence.
    pub confidence: f32,
    /// Seconds spent on the document.
    pub elapsed: f64,
}

/// A document that could not be processed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DocumentFailure {
    pub message: String,
    pub elapsed: f64,
}

/// Runs the full pipeline on one document.
pub fn process_document(
    ctx: &PipelineContext,
    job: &DocumentJob,
) -> Result<DocumentOutcome, DocumentFailure> {
    let start = Instant::now();
    match run_stages(ctx, job) {
        Ok(mut outcome) => {
            outcome.elapsed = start.elapsed().as_secs_f64();
            info!("OCR for {} took {:.2} seconds", job.id, outcome.elapsed);
            Ok(outcome)
        }
        Err(e) => Err(DocumentFailure {
            message: error_chain(&e),
            elapsed: start.elapsed().as_secs_f64(),
        }),
    }
}

fn run_stages(ctx: &PipelineContext, job: &DocumentJob) -> Result<DocumentOutcome, BatchError> {
    let kind = DocumentKind::detect(&job.path)?.ok_or_else(|| BatchError::UnsupportedFileType {
        path: job.path.clone(),
    })?;

    let pages = ctx.loader.load_pair(
        &job.path,
        kind,
        ctx.options.pages.as_ref(),
        ctx.options.low_res_dpi,
        ctx.options.high_res_dpi,
    )?;
    debug!("Loaded {} pages of {}", pages.len(), job.id);

    let low_res_layouts = stages::analyze_layout(ctx, job, &pages)?;
    let detections = stages::detect_text(ctx, job, &pages)?;
    let texts = stages::recognize_text(ctx, job, &pages)?;
    let layouts = stages::rescale_layouts(&low_res_layouts, &pages);
    let tables = stages::recognize_tables(ctx, job, &layouts, &pages)?;

    #[cfg(feature = "visualization")]
    if let Some(renderer) = &ctx.overlays {
        let inputs = visualize::OverlayInputs {
            job,
            pages: &pages,
            layouts: &low_res_layouts,
            detections: &detections,
            texts: &texts,
            tables: &tables,
        };
        renderer.render(&ctx.output, &inputs)?;
    }

    let confidence = mean_or_zero(texts.iter().map(|page| page.confidence()));
    let num_pages = pages.len();
    drop(pages);

    let merged = merge_document(&layouts, &texts, tables.tables)?;
    output::write_document_json(&ctx.output.merged_path(&job.id), &job.id, &merged)?;

    let raw = RawText::from_merged(&job.id, &merged)?;
    output::write_json(&ctx.output.raw_text_path(&job.id), &raw)?;

    Ok(DocumentOutcome {
        word_count: raw.word_count,
        num_pages,
        confidence,
        elapsed: 0.0,
    })
}
