//! The per-page structure produced by the merge engine.

use serde::{Deserialize, Serialize};

use super::layout::LayoutBox;
use super::table::RecognizedTable;
use super::text::TextLine;
use crate::processors::Rect;

/// A layout region with the content the merge engine attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBox {
    #[serde(flatten)]
    pub layout: LayoutBox,
    /// Lines whose centers fall inside a non-table region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_lines: Option<Vec<TextLine>>,
    /// The structure recognized for a table region, with cell texts filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_content: Option<RecognizedTable>,
}

impl MergedBox {
    pub fn bare(layout: LayoutBox) -> Self {
        Self {
            layout,
            text_lines: None,
            table_content: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.layout.label
    }
}

/// Layout regions of one page with their text and tables attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPage {
    /// 1-based page number.
    pub page: usize,
    pub image_bbox: Rect,
    pub bboxes: Vec<MergedBox>,
}

impl MergedPage {
    /// Tables attached to this page, in region order.
    pub fn tables(&self) -> impl Iterator<Item = &RecognizedTable> {
        self.bboxes.iter().filter_map(|b| b.table_content.as_ref())
    }
}
