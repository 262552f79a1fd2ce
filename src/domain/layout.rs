//! Layout analysis result types.

use serde::{Deserialize, Serialize};

use crate::core::constants::{FIGURE_LABELS, TABLE_LABELS};
use crate::processors::{Polygon, Rect};

/// How the pipeline treats a layout region, derived from its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Figure or picture: cropped and persisted as an asset.
    Figure,
    /// Table-like region: sent to table structure recognition.
    Table,
    /// Anything else: receives text lines during merge.
    Text,
}

impl RegionKind {
    /// Classifies a layout label. Matching is exact, labels are case-sensitive.
    pub fn from_label(label: &str) -> Self {
        if TABLE_LABELS.contains(&label) {
            RegionKind::Table
        } else if FIGURE_LABELS.contains(&label) {
            RegionKind::Figure
        } else {
            RegionKind::Text
        }
    }
}

/// A labeled region on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBox {
    /// Quadrilateral outline of the region.
    pub polygon: Polygon,
    /// Axis-aligned bounds of the region.
    pub bbox: Rect,
    /// Semantic label, e.g. "Text", "Table" or "Picture".
    pub label: String,
    /// Reading-order position on the page.
    pub position: usize,
    /// Detection confidence, when the model reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl LayoutBox {
    /// Creates a box whose polygon is the rectangle itself.
    pub fn new(bbox: Rect, label: impl Into<String>, position: usize) -> Self {
        Self {
            polygon: bbox.to_polygon(),
            bbox,
            label: label.into(),
            position,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn kind(&self) -> RegionKind {
        RegionKind::from_label(&self.label)
    }

    pub fn is_table(&self) -> bool {
        self.kind() == RegionKind::Table
    }

    pub fn is_figure(&self) -> bool {
        self.kind() == RegionKind::Figure
    }

    /// Returns the box with all coordinates scaled.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            polygon: self.polygon.scale(sx, sy),
            bbox: self.bbox.scale(sx, sy),
            ..self.clone()
        }
    }
}

/// Layout model output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    /// Regions in the order the model emitted them.
    pub bboxes: Vec<LayoutBox>,
    /// Bounds of the analysed page image.
    pub image_bbox: Rect,
    /// 1-based page number, assigned by the pipeline.
    #[serde(default)]
    pub page: usize,
}

impl PageLayout {
    pub fn new(bboxes: Vec<LayoutBox>, image_bbox: Rect) -> Self {
        Self {
            bboxes,
            image_bbox,
            page: 0,
        }
    }

    /// Regions labeled as tables, in page order.
    pub fn tables(&self) -> impl Iterator<Item = &LayoutBox> {
        self.bboxes.iter().filter(|b| b.is_table())
    }

    /// Regions labeled as figures or pictures, in page order.
    pub fn figures(&self) -> impl Iterator<Item = &LayoutBox> {
        self.bboxes.iter().filter(|b| b.is_figure())
    }

    /// Returns the layout with every coordinate scaled.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bboxes: self.bboxes.iter().map(|b| b.scaled(sx, sy)).collect(),
            image_bbox: self.image_bbox.scale(sx, sy),
            page: self.page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_kind_from_label() {
        assert_eq!(RegionKind::from_label("Table"), RegionKind::Table);
        assert_eq!(RegionKind::from_label("Table-of-contents"), RegionKind::Table);
        assert_eq!(RegionKind::from_label("Picture"), RegionKind::Figure);
        assert_eq!(RegionKind::from_label("Figure"), RegionKind::Figure);
        assert_eq!(RegionKind::from_label("SectionHeader"), RegionKind::Text);
        assert_eq!(RegionKind::from_label("table"), RegionKind::Text);
    }

    #[test]
    fn test_page_layout_deserializes_model_output() {
        let json = r#"{
            "bboxes": [
                {"polygon": [[0,0],[10,0],[10,5],[0,5]], "bbox": [0,0,10,5], "label": "Text", "position": 0},
                {"polygon": [[0,6],[10,6],[10,9],[0,9]], "bbox": [0,6,10,9], "label": "Table", "position": 1, "confidence": 0.9}
            ],
            "image_bbox": [0, 0, 100, 200]
        }"#;
        let layout: PageLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.page, 0);
        assert_eq!(layout.tables().count(), 1);
        assert_eq!(layout.figures().count(), 0);
        assert_eq!(layout.bboxes[1].confidence, Some(0.9));
    }

    #[test]
    fn test_page_layout_scaled() {
        let layout = PageLayout::new(
            vec![LayoutBox::new(Rect::new(1.0, 2.0, 3.0, 4.0), "Text", 0)],
            Rect::from_size(10, 20),
        );
        let scaled = layout.scaled(2.0, 2.0);
        assert_eq!(scaled.image_bbox, Rect::from_size(20, 40));
        assert_eq!(scaled.bboxes[0].bbox, Rect::new(2.0, 4.0, 6.0, 8.0));
        assert_eq!(scaled.bboxes[0].polygon.bounding_rect(), Rect::new(2.0, 4.0, 6.0, 8.0));
    }
}
