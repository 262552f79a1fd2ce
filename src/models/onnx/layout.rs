//! RT-DETR layout detection (PP-DocLayout exports).

use std::cmp::Ordering;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4};

use super::preprocess::Normalize;
use super::session::{OnnxSession, tensor_view};
use crate::core::errors::BatchError;
use crate::domain::{LayoutBox, PageLayout};
use crate::models::{LayoutModel, PageBatch};
use crate::processors::{Rect, containment_score};

/// PP-DocLayout-L classes, in model order, mapped onto the pipeline's labels.
pub const PP_DOCLAYOUT_LABELS: &[&str] = &[
    "Section-header",    // paragraph_title
    "Picture",           // image
    "Text",              // text
    "Page-footer",       // number
    "Text",              // abstract
    "Table-of-contents", // content
    "Caption",           // figure_title
    "Formula",           // formula
    "Table",             // table
    "Caption",           // table_title
    "Text",              // reference
    "Title",             // doc_title
    "Footnote",          // footnote
    "Page-header",       // header
    "Code",              // algorithm
    "Page-footer",       // footer
    "Picture",           // seal
    "Caption",           // chart_title
    "Figure",            // chart
    "Formula",           // formula_number
    "Page-header",       // header_image
    "Page-footer",       // footer_image
    "Text",              // aside_text
];

/// A box of the same label covering this much of another suppresses it.
const CONTAINED_OVERLAP: f32 = 0.9;

/// One raw detection: class index, score and corners in page pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub score: f32,
    pub rect: Rect,
}

impl RawDetection {
    /// Parses `[class, score, x1, y1, x2, y2, ..]` rows.
    pub fn from_rows(data: &[f32], row_len: usize) -> Vec<RawDetection> {
        if row_len < 6 {
            return Vec::new();
        }
        data.chunks_exact(row_len)
            .filter(|row| row[0] >= 0.0)
            .map(|row| RawDetection {
                class_id: row[0] as usize,
                score: row[1],
                rect: Rect::new(row[2], row[3], row[4], row[5]),
            })
            .collect()
    }
}

/// Turns raw detections into a [`PageLayout`].
#[derive(Debug, Clone)]
pub struct LayoutDecoder {
    labels: Vec<String>,
    threshold: f32,
}

impl LayoutDecoder {
    pub fn new(labels: Vec<String>, threshold: f32) -> Self {
        Self { labels, threshold }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Filters, deduplicates and orders detections on a `width`x`height` page.
    ///
    /// Detections under the threshold or with an unknown class are dropped,
    /// boxes are clamped to the page, and a box mostly inside a higher
    /// scoring box of the same label is discarded. Positions follow reading
    /// order: top to bottom, then left to right.
    pub fn decode(&self, detections: &[RawDetection], width: u32, height: u32) -> PageLayout {
        let page = Rect::from_size(width, height);

        let mut candidates: Vec<(&str, f32, Rect)> = detections
            .iter()
            .filter(|d| d.score >= self.threshold)
            .filter_map(|d| {
                let label = self.labels.get(d.class_id)?;
                let rect = Rect::new(
                    d.rect.x_min.clamp(0.0, page.x_max),
                    d.rect.y_min.clamp(0.0, page.y_max),
                    d.rect.x_max.clamp(0.0, page.x_max),
                    d.rect.y_max.clamp(0.0, page.y_max),
                );
                (rect.width() > 1.0 && rect.height() > 1.0).then_some((label.as_str(), d.score, rect))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let mut kept: Vec<(&str, f32, Rect)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = kept.iter().any(|(label, _, rect)| {
                *label == candidate.0 && containment_score(rect, &candidate.2) >= CONTAINED_OVERLAP
            });
            if !duplicate {
                kept.push(candidate);
            }
        }

        kept.sort_by(|a, b| {
            a.2.y_min
                .total_cmp(&b.2.y_min)
                .then(a.2.x_min.total_cmp(&b.2.x_min))
        });

        let bboxes = kept
            .into_iter()
            .enumerate()
            .map(|(position, (label, score, rect))| {
                LayoutBox::new(rect, label, position).with_confidence(score)
            })
            .collect();
        PageLayout::new(bboxes, page)
    }
}

/// Layout model backed by an ONNX session.
#[derive(Debug)]
pub struct OnnxLayoutModel {
    session: OnnxSession,
    decoder: LayoutDecoder,
    /// Model input as (width, height).
    input_size: (u32, u32),
}

impl OnnxLayoutModel {
    pub fn new(session: OnnxSession, decoder: LayoutDecoder, input_size: (u32, u32)) -> Self {
        Self {
            session,
            decoder,
            input_size,
        }
    }

    fn predict_page(&self, image: &RgbImage, feeds_im_shape: bool) -> Result<PageLayout, BatchError> {
        let (in_w, in_h) = self.input_size;
        let resized = imageops::resize(image, in_w, in_h, FilterType::Triangle);
        let mut pixels = Array4::<f32>::zeros((1, 3, in_h as usize, in_w as usize));
        Normalize::UNIT.write(&resized, &mut pixels, 0);

        let scale_factor = Array2::from_shape_vec(
            (1, 2),
            vec![
                in_h as f32 / image.height().max(1) as f32,
                in_w as f32 / image.width().max(1) as f32,
            ],
        )
        .map_err(|e| BatchError::inference(self.session.name(), e.to_string()))?;
        let im_shape = Array2::from_shape_vec((1, 2), vec![in_h as f32, in_w as f32])
            .map_err(|e| BatchError::inference(self.session.name(), e.to_string()))?;

        let tensor_error = |e| self.session.error("input tensor", e);
        let image_tensor = tensor_view(&pixels).map_err(tensor_error)?;
        let scale_tensor = tensor_view(&scale_factor).map_err(tensor_error)?;

        let mut session = self.session.lock()?;
        let result = if feeds_im_shape {
            let shape_tensor = tensor_view(&im_shape).map_err(tensor_error)?;
            session.run(ort::inputs![
                "image" => image_tensor,
                "im_shape" => shape_tensor,
                "scale_factor" => scale_tensor
            ])
        } else {
            session.run(ort::inputs![
                "image" => image_tensor,
                "scale_factor" => scale_tensor
            ])
        };
        let outputs = result.map_err(|e| self.session.error("forward pass", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| self.session.error("output extraction", e))?;
        let row_len = shape.last().copied().unwrap_or(0).max(0) as usize;
        let detections = RawDetection::from_rows(data, row_len);

        Ok(self.decoder.decode(&detections, image.width(), image.height()))
    }
}

impl LayoutModel for OnnxLayoutModel {
    fn predict(&self, batch: &PageBatch<'_>) -> Result<Vec<PageLayout>, BatchError> {
        let feeds_im_shape = self.session.has_input("im_shape")?;
        batch
            .images
            .iter()
            .map(|image| self.predict_page(image, feeds_im_shape))
            .collect()
    }
}
