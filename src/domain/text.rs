//! Text detection and recognition result types.

use serde::{Deserialize, Serialize};

use crate::processors::{Polygon, Rect};

/// Arithmetic mean, or 0.0 for an empty input.
pub fn mean_or_zero(values: impl IntoIterator<Item = f32>) -> f32 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// A candidate text region from the detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub polygon: Polygon,
    pub bbox: Rect,
    #[serde(default)]
    pub confidence: f32,
}

impl DetectionBox {
    pub fn new(bbox: Rect, confidence: f32) -> Self {
        Self {
            polygon: bbox.to_polygon(),
            bbox,
            confidence,
        }
    }
}

/// Detection model output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDetection {
    pub bboxes: Vec<DetectionBox>,
    pub image_bbox: Rect,
}

/// A recognized line of text in high-resolution page coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub polygon: Polygon,
    pub bbox: Rect,
    pub text: String,
    pub confidence: f32,
}

impl TextLine {
    pub fn new(bbox: Rect, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            polygon: bbox.to_polygon(),
            bbox,
            text: text.into(),
            confidence,
        }
    }
}

/// Recognition model output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub text_lines: Vec<TextLine>,
    pub image_bbox: Rect,
}

impl PageText {
    pub fn new(text_lines: Vec<TextLine>, image_bbox: Rect) -> Self {
        Self {
            text_lines,
            image_bbox,
        }
    }

    /// Mean line confidence; a page without lines scores 0.0.
    pub fn confidence(&self) -> f32 {
        mean_or_zero(self.text_lines.iter().map(|l| l.confidence))
    }
}
