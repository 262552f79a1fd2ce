//! DB (Differentiable Binarization) text detection.

use std::collections::VecDeque;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4, ArrayView2, s};

use super::preprocess::{Normalize, fit_to_stride};
use super::session::{OnnxSession, tensor_view};
use crate::core::errors::BatchError;
use crate::domain::{DetectionBox, PageDetection};
use crate::models::{DetectionModel, PageBatch};
use crate::processors::Rect;

/// Turns a DB probability map into text boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct DbPostProcess {
    /// Threshold for binarizing the probability map (default: 0.3).
    pub thresh: f32,
    /// Minimum mean probability inside a box (default: 0.6).
    pub box_thresh: f32,
    /// Ratio for expanding boxes back to full text height (default: 1.5).
    pub unclip_ratio: f32,
    /// Minimum side length of a box, in map pixels.
    pub min_size: f32,
    pub max_candidates: usize,
}

impl Default for DbPostProcess {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            min_size: 3.0,
            max_candidates: 1000,
        }
    }
}

impl DbPostProcess {
    pub fn new(thresh: f32, box_thresh: f32, unclip_ratio: f32) -> Self {
        Self {
            thresh,
            box_thresh,
            unclip_ratio,
            ..Self::default()
        }
    }

    /// Extracts boxes from `pred`, scaled to a `width`x`height` source image.
    ///
    /// Boxes come back top to bottom, then left to right.
    pub fn boxes(&self, pred: ArrayView2<'_, f32>, width: u32, height: u32) -> Vec<DetectionBox> {
        let (map_h, map_w) = pred.dim();
        if map_h == 0 || map_w == 0 {
            return Vec::new();
        }
        let sx = width as f32 / map_w as f32;
        let sy = height as f32 / map_h as f32;

        let mut boxes: Vec<DetectionBox> = components(&pred, self.thresh)
            .into_iter()
            .take(self.max_candidates)
            .filter_map(|(x0, y0, x1, y1)| {
                let (w, h) = ((x1 - x0 + 1) as f32, (y1 - y0 + 1) as f32);
                if w.min(h) < self.min_size {
                    return None;
                }
                let score = pred.slice(s![y0..=y1, x0..=x1]).mean().unwrap_or(0.0);
                if score < self.box_thresh {
                    return None;
                }

                let distance = w * h * self.unclip_ratio / (2.0 * (w + h));
                let expanded = Rect::new(
                    x0 as f32 - distance,
                    y0 as f32 - distance,
                    (x1 + 1) as f32 + distance,
                    (y1 + 1) as f32 + distance,
                );
                if expanded.width().min(expanded.height()) < self.min_size + 2.0 {
                    return None;
                }

                let rect = Rect::new(
                    (expanded.x_min * sx).clamp(0.0, width as f32),
                    (expanded.y_min * sy).clamp(0.0, height as f32),
                    (expanded.x_max * sx).clamp(0.0, width as f32),
                    (expanded.y_max * sy).clamp(0.0, height as f32),
                );
                Some(DetectionBox::new(rect, score))
            })
            .collect();

        boxes.sort_by(|a, b| {
            a.bbox
                .y_min
                .total_cmp(&b.bbox.y_min)
                .then(a.bbox.x_min.total_cmp(&b.bbox.x_min))
        });
        boxes
    }
}

/// Bounding boxes `(x0, y0, x1, y1)` (inclusive) of the 4-connected regions
/// above `thresh`, in scan order of their first pixel.
fn components(pred: &ArrayView2<'_, f32>, thresh: f32) -> Vec<(usize, usize, usize, usize)> {
    let (h, w) = pred.dim();
    let mut seen = Array2::<bool>::from_elem((h, w), false);
    let mut queue = VecDeque::new();
    let mut regions = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if seen[[y, x]] || pred[[y, x]] <= thresh {
                continue;
            }
            seen[[y, x]] = true;
            queue.push_back((y, x));
            let (mut x0, mut y0, mut x1, mut y1) = (x, y, x, y);

            while let Some((cy, cx)) = queue.pop_front() {
                x0 = x0.min(cx);
                x1 = x1.max(cx);
                y0 = y0.min(cy);
                y1 = y1.max(cy);

                let neighbors = [
                    (cy.wrapping_sub(1), cx),
                    (cy + 1, cx),
                    (cy, cx.wrapping_sub(1)),
                    (cy, cx + 1),
                ];
                for (ny, nx) in neighbors {
                    if ny < h && nx < w && !seen[[ny, nx]] && pred[[ny, nx]] > thresh {
                        seen[[ny, nx]] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }
            regions.push((x0, y0, x1, y1));
        }
    }
    regions
}

/// Text detection model backed by an ONNX session.
#[derive(Debug)]
pub struct OnnxTextDetector {
    session: OnnxSession,
    postprocess: DbPostProcess,
    limit_side_len: u32,
}

impl OnnxTextDetector {
    pub fn new(session: OnnxSession, postprocess: DbPostProcess, limit_side_len: u32) -> Self {
        Self {
            session,
            postprocess,
            limit_side_len,
        }
    }

    fn detect_page(&self, image: &RgbImage) -> Result<PageDetection, BatchError> {
        let (in_w, in_h) = fit_to_stride(image.width(), image.height(), self.limit_side_len);
        let resized = imageops::resize(image, in_w, in_h, FilterType::Triangle);
        let mut pixels = Array4::<f32>::zeros((1, 3, in_h as usize, in_w as usize));
        Normalize::IMAGENET.write(&resized, &mut pixels, 0);

        let input = tensor_view(&pixels).map_err(|e| self.session.error("input tensor", e))?;
        let mut session = self.session.lock()?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| self.session.error("forward pass", e))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| self.session.error("output extraction", e))?;

        // [1, 1, H, W]
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let (map_h, map_w) = match dims.as_slice() {
            [.., h, w] => (*h, *w),
            _ => {
                return Err(BatchError::inference(
                    self.session.name(),
                    format!("unexpected output shape {dims:?}"),
                ));
            }
        };
        let pred = data
            .get(..map_h * map_w)
            .ok_or_else(|| {
                BatchError::inference(self.session.name(), "probability map shorter than its shape")
            })
            .and_then(|map| {
                ArrayView2::from_shape((map_h, map_w), map)
                    .map_err(|e| BatchError::inference(self.session.name(), e.to_string()))
            })?;

        Ok(PageDetection {
            bboxes: self.postprocess.boxes(pred, image.width(), image.height()),
            image_bbox: Rect::from_size(image.width(), image.height()),
        })
    }
}

impl DetectionModel for OnnxTextDetector {
    fn detect(&self, batch: &PageBatch<'_>) -> Result<Vec<PageDetection>, BatchError> {
        batch.images.iter().map(|image| self.detect_page(image)).collect()
    }
}
