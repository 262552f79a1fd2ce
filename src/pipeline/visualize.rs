//! Save-images mode overlays.

use std::path::PathBuf;

use ab_glyph::FontVec;
use image::RgbImage;
use rayon::prelude::*;
use tracing::debug;

use super::output::{OutputLayout, OverlayKind, save_image};
use super::stages::TableStage;
use crate::core::errors::BatchError;
use crate::domain::{DocumentJob, PageDetection, PageLayout, PageText};
use crate::loader::PageImages;
use crate::processors::{Polygon, Rect};
use crate::utils::font::acquire_font;
use crate::utils::visualization::{
    BLUE, GREEN, LABEL_FONT_SIZE, RED, TABLE_LABEL_FONT_SIZE, blank_canvas, draw_polygons,
    draw_rects, render_text_lines,
};

const TEXT_UPSCALE: u32 = 2;
const MAX_TEXT_FONT_SIZE: f32 = 60.0;

/// Everything the overlays of one document are drawn from.
pub struct OverlayInputs<'a> {
    pub job: &'a DocumentJob,
    pub pages: &'a PageImages,
    /// Low-resolution layouts.
    pub layouts: &'a [PageLayout],
    pub detections: &'a [PageDetection],
    pub texts: &'a [PageText],
    pub tables: &'a TableStage,
}

/// Draws overlays with an optional font.
pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Loads the font from `font_dir`, downloading it if needed.
    pub fn from_font_dir(font_dir: Option<&std::path::Path>) -> Self {
        Self::new(acquire_font(font_dir))
    }

    /// Draws and saves every overlay of one document.
    pub fn render(&self, output: &OutputLayout, inputs: &OverlayInputs<'_>) -> Result<(), BatchError> {
        let mut frames = Vec::new();
        self.page_overlays(output, inputs, &mut frames);
        if let Some(font) = &self.font {
            text_overlays(output, inputs, font, &mut frames);
        }
        self.table_overlays(output, inputs, &mut frames);

        debug!("Saving {} overlays for {}", frames.len(), inputs.job.id);
        frames
            .par_iter()
            .try_for_each(|(path, image)| save_image(path, image))
    }

    fn page_overlays(
        &self,
        output: &OutputLayout,
        inputs: &OverlayInputs<'_>,
        frames: &mut Vec<(PathBuf, RgbImage)>,
    ) {
        let id = &inputs.job.id;
        let font = self.font.as_ref();
        let pages = inputs.layouts.iter().zip(inputs.detections).zip(&inputs.pages.low);

        for ((layout, detection), image) in pages {
            let polygons: Vec<Polygon> = layout.bboxes.iter().map(|b| b.polygon.clone()).collect();
            let labels: Vec<String> = layout
                .bboxes
                .iter()
                .map(|b| format!("{}-{}", b.label, b.position))
                .collect();
            let detected: Vec<Polygon> = detection.bboxes.iter().map(|b| b.polygon.clone()).collect();

            let mut with_layout = image.clone();
            draw_polygons(&mut with_layout, &polygons, Some(&labels), RED, font, LABEL_FONT_SIZE);

            let mut with_boxes = image.clone();
            draw_polygons(&mut with_boxes, &detected, None, BLUE, font, LABEL_FONT_SIZE);

            let mut combined = with_layout.clone();
            draw_polygons(&mut combined, &detected, None, BLUE, font, LABEL_FONT_SIZE);

            let page = layout.page;
            frames.push((
                output.overlay_dir(OverlayKind::Layout, id).join(format!("{page}_layout.png")),
                with_layout,
            ));
            frames.push((
                output.overlay_dir(OverlayKind::Bboxes, id).join(format!("{page}_bbox.png")),
                with_boxes,
            ));
            frames.push((
                output
                    .overlay_dir(OverlayKind::LayoutWithBboxes, id)
                    .join(format!("{page}_layout_w_bbox.png")),
                combined,
            ));
        }
    }

    fn table_overlays(
        &self,
        output: &OutputLayout,
        inputs: &OverlayInputs<'_>,
        frames: &mut Vec<(PathBuf, RgbImage)>,
    ) {
        let font = self.font.as_ref();
        let dir = output.overlay_dir(OverlayKind::Table, &inputs.job.id);
        let mut page_canvas: Option<(usize, RgbImage)> = None;

        for (table, crop) in inputs.tables.tables.iter().zip(&inputs.tables.crops) {
            let structure = &table.structure;
            let (page, idx) = (table.page, table.table_idx);
            let Some(page_idx) = inputs.pages.numbers.iter().position(|&n| n == page) else {
                continue;
            };
            let (width, height) = inputs.pages.high[page_idx].dimensions();

            let rows: Vec<Rect> = structure.rows.iter().map(|r| r.bbox).collect();
            let row_labels: Vec<String> = structure.rows.iter().map(|r| format!("Row {}", r.row_id)).collect();
            let cols: Vec<Rect> = structure.cols.iter().map(|c| c.bbox).collect();
            let col_labels: Vec<String> = structure.cols.iter().map(|c| format!("Col {}", c.col_id)).collect();
            let cells: Vec<Rect> = structure.cells.iter().map(|c| c.bbox).collect();
            let adjusted_cells: Vec<Rect> = structure.cells.iter().filter_map(|c| c.adjusted_bbox).collect();
            let table_label = [format!("Table {idx}")];

            let mut rc = crop.clone();
            draw_rects(&mut rc, &rows, Some(&row_labels), BLUE, font, TABLE_LABEL_FONT_SIZE);
            draw_rects(&mut rc, &cols, Some(&col_labels), RED, font, TABLE_LABEL_FONT_SIZE);
            frames.push((dir.join(format!("{page}_table{idx}_rc.png")), rc));

            let mut cell_image = crop.clone();
            draw_rects(&mut cell_image, &cells, None, GREEN, font, TABLE_LABEL_FONT_SIZE);
            frames.push((dir.join(format!("{page}_table{idx}_cells.png")), cell_image));

            let mut rescaled = blank_canvas(width, height);
            draw_rects(&mut rescaled, &[table.adjusted_image_bbox], Some(&table_label), RED, font, TABLE_LABEL_FONT_SIZE);
            draw_rects(&mut rescaled, &adjusted_cells, None, GREEN, font, TABLE_LABEL_FONT_SIZE);
            frames.push((dir.join(format!("{page}_table{idx}_rescaled.png")), rescaled));

            if page_canvas.as_ref().is_some_and(|(p, _)| *p != page) {
                if let Some((p, canvas)) = page_canvas.take() {
                    frames.push((dir.join(format!("{p}_all_tables_rescaled.png")), canvas));
                }
            }
            let (_, canvas) = page_canvas.get_or_insert_with(|| (page, blank_canvas(width, height)));
            draw_rects(canvas, &[table.adjusted_image_bbox], Some(&table_label), RED, font, TABLE_LABEL_FONT_SIZE);
            draw_rects(canvas, &adjusted_cells, None, GREEN, font, TABLE_LABEL_FONT_SIZE);
        }

        if let Some((p, canvas)) = page_canvas {
            frames.push((dir.join(format!("{p}_all_tables_rescaled.png")), canvas));
        }
    }
}

fn text_overlays(
    output: &OutputLayout,
    inputs: &OverlayInputs<'_>,
    font: &FontVec,
    frames: &mut Vec<(PathBuf, RgbImage)>,
) {
    let dir = output.overlay_dir(OverlayKind::Text, &inputs.job.id);
    let pages = inputs.texts.iter().zip(&inputs.pages.high).zip(&inputs.pages.numbers);
    for ((text, image), page) in pages {
        let lines: Vec<(Rect, &str)> = text
            .text_lines
            .iter()
            .map(|line| (line.bbox, line.text.as_str()))
            .collect();
        let canvas = render_text_lines(
            image.width(),
            image.height(),
            &lines,
            font,
            TEXT_UPSCALE,
            MAX_TEXT_FONT_SIZE,
        );
        frames.push((dir.join(format!("{page}_text.png")), canvas));
    }
}
