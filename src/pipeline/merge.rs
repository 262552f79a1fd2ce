//! Attaches recognized text to layout regions and table cells.
//!
//! A text line belongs to every region whose interior strictly contains the
//! line's center, so a line can be attributed to two overlapping regions and
//! a line centered on a shared edge is attributed to neither. Table regions
//! take the next recognized table from a queue filled in the same page and
//! layout order the table stage crops in.

use std::collections::VecDeque;

use tracing::debug;

use crate::core::errors::{BatchError, ProcessingStage};
use crate::domain::{MergedBox, MergedPage, PageLayout, PageText, RecognizedTable, TextLine};
use crate::processors::CenterIndex;

/// Merges one document.
///
/// `layouts` and `texts` are per page and in the same (high-resolution)
/// coordinate space; `tables` is the table stage output in document order.
pub fn merge_document(
    layouts: &[PageLayout],
    texts: &[PageText],
    tables: Vec<RecognizedTable>,
) -> Result<Vec<MergedPage>, BatchError> {
    if layouts.len() != texts.len() {
        return Err(BatchError::processing(
            ProcessingStage::Merge,
            format!("{} layout pages but {} text pages", layouts.len(), texts.len()),
        ));
    }

    let mut queue: VecDeque<RecognizedTable> = tables.into();
    let merged = layouts
        .iter()
        .zip(texts)
        .map(|(layout, text)| merge_page(layout, text, &mut queue))
        .collect::<Result<Vec<_>, _>>()?;

    if !queue.is_empty() {
        return Err(BatchError::processing(
            ProcessingStage::Merge,
            format!("{} recognized tables have no layout region", queue.len()),
        ));
    }
    Ok(merged)
}

fn merge_page(
    layout: &PageLayout,
    text: &PageText,
    queue: &mut VecDeque<RecognizedTable>,
) -> Result<MergedPage, BatchError> {
    let lines = &text.text_lines;
    let index = CenterIndex::from_rects(lines.iter().map(|line| &line.bbox));

    let mut bboxes = Vec::with_capacity(layout.bboxes.len());
    for region in &layout.bboxes {
        let mut merged = MergedBox::bare(region.clone());
        if region.is_table() {
            let mut table = queue.pop_front().ok_or_else(|| {
                BatchError::processing(
                    ProcessingStage::Merge,
                    format!("no recognized table left for region {} on page {}", region.position, layout.page),
                )
            })?;
            if table.page != layout.page {
                return Err(BatchError::processing(
                    ProcessingStage::Merge,
                    format!("table from page {} reached region on page {}", table.page, layout.page),
                ));
            }
            fill_cells(&mut table, &index, lines);
            merged.table_content = Some(table);
        } else {
            merged.text_lines = Some(
                index
                    .inside(&region.bbox)
                    .into_iter()
                    .map(|i| lines[i].clone())
                    .collect(),
            );
        }
        bboxes.push(merged);
    }

    debug!("Merged page {}: {} regions, {} lines", layout.page, bboxes.len(), lines.len());
    Ok(MergedPage {
        page: layout.page,
        image_bbox: layout.image_bbox,
        bboxes,
    })
}

fn fill_cells(table: &mut RecognizedTable, index: &CenterIndex, lines: &[TextLine]) {
    for cell in &mut table.structure.cells {
        let Some(rect) = cell.adjusted_bbox else {
            continue;
        };
        let text = index
            .inside(&rect)
            .into_iter()
            .map(|i| lines[i].text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        cell.text = Some(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LayoutBox, TableCell, TableStructure};
    use crate::processors::Rect;

    fn page_layout(page: usize, boxes: Vec<LayoutBox>) -> PageLayout {
        let mut layout = PageLayout::new(boxes, Rect::from_size(1000, 1000));
        layout.page = page;
        layout
    }

    fn line(x0: f32, y0: f32, x1: f32, y1: f32, text: &str) -> TextLine {
        TextLine::new(Rect::new(x0, y0, x1, y1), text, 0.9)
    }

    fn one_cell_table(page: usize, region: Rect) -> RecognizedTable {
        let structure = TableStructure {
            rows: Vec::new(),
            cols: Vec::new(),
            cells: vec![TableCell::new(Rect::new(0.0, 0.0, region.width(), region.height()), 0, 0)],
            image_bbox: Rect::new(0.0, 0.0, region.width(), region.height()),
        };
        RecognizedTable::from_crop(page, 0, &region, structure)
    }

    #[test]
    fn test_lines_attach_to_containing_regions() {
        let layouts = vec![page_layout(
            1,
            vec![
                LayoutBox::new(Rect::new(0.0, 0.0, 500.0, 100.0), "SectionHeader", 0),
                LayoutBox::new(Rect::new(0.0, 100.0, 500.0, 400.0), "Text", 1),
            ],
        )];
        let texts = vec![PageText::new(
            vec![
                line(10.0, 10.0, 200.0, 40.0, "Title"),
                line(10.0, 150.0, 400.0, 180.0, "Body one"),
                line(10.0, 200.0, 400.0, 230.0, "Body two"),
            ],
            Rect::from_size(1000, 1000),
        )];

        let merged = merge_document(&layouts, &texts, Vec::new()).unwrap();
        let regions = &merged[0].bboxes;
        assert_eq!(merged[0].page, 1);
        assert_eq!(regions[0].text_lines.as_ref().unwrap()[0].text, "Title");
        let body: Vec<_> = regions[1].text_lines.as_ref().unwrap().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(body, ["Body one", "Body two"]);
    }

    #[test]
    fn test_overlapping_regions_share_a_line() {
        let layouts = vec![page_layout(
            1,
            vec![
                LayoutBox::new(Rect::new(0.0, 0.0, 300.0, 300.0), "Text", 0),
                LayoutBox::new(Rect::new(100.0, 100.0, 400.0, 400.0), "Caption", 1),
            ],
        )];
        let texts = vec![PageText::new(
            vec![line(150.0, 150.0, 250.0, 170.0, "shared")],
            Rect::from_size(1000, 1000),
        )];

        let merged = merge_document(&layouts, &texts, Vec::new()).unwrap();
        assert_eq!(merged[0].bboxes[0].text_lines.as_ref().unwrap().len(), 1);
        assert_eq!(merged[0].bboxes[1].text_lines.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_line_centered_on_edge_belongs_to_neither() {
        let layouts = vec![page_layout(
            1,
            vec![
                LayoutBox::new(Rect::new(0.0, 0.0, 100.0, 100.0), "Text", 0),
                LayoutBox::new(Rect::new(100.0, 0.0, 200.0, 100.0), "Text", 1),
            ],
        )];
        let texts = vec![PageText::new(
            vec![line(90.0, 40.0, 110.0, 60.0, "edge")],
            Rect::from_size(1000, 1000),
        )];

        let merged = merge_document(&layouts, &texts, Vec::new()).unwrap();
        assert!(merged[0].bboxes.iter().all(|b| b.text_lines.as_ref().unwrap().is_empty()));
    }

    #[test]
    fn test_table_cells_take_text_from_rebased_boxes() {
        let region = Rect::new(100.7, 500.2, 300.0, 560.0);
        let layouts = vec![page_layout(2, vec![LayoutBox::new(region, "Table", 0)])];
        let texts = vec![PageText::new(
            vec![
                line(110.0, 510.0, 150.0, 530.0, "42"),
                line(160.0, 510.0, 200.0, 530.0, "units"),
                line(110.0, 600.0, 150.0, 620.0, "outside"),
            ],
            Rect::from_size(1000, 1000),
        )];

        let merged = merge_document(&layouts, &texts, vec![one_cell_table(2, region)]).unwrap();
        let table = merged[0].bboxes[0].table_content.as_ref().unwrap();
        assert_eq!(table.structure.cells[0].text.as_deref(), Some("42 units"));
        assert!(merged[0].bboxes[0].text_lines.is_none());
    }

    #[test]
    fn test_table_queue_stays_aligned_across_pages_without_text() {
        let first = Rect::new(0.0, 0.0, 100.0, 100.0);
        let second = Rect::new(0.0, 0.0, 200.0, 100.0);
        let layouts = vec![
            page_layout(1, vec![LayoutBox::new(first, "Table", 0)]),
            page_layout(2, vec![LayoutBox::new(second, "Table-of-contents", 0)]),
        ];
        let texts = vec![
            PageText::new(Vec::new(), Rect::from_size(1000, 1000)),
            PageText::new(vec![line(10.0, 10.0, 50.0, 30.0, "Contents")], Rect::from_size(1000, 1000)),
        ];
        let tables = vec![one_cell_table(1, first), one_cell_table(2, second)];

        let merged = merge_document(&layouts, &texts, tables).unwrap();
        let page_two = merged[1].bboxes[0].table_content.as_ref().unwrap();
        assert_eq!(page_two.page, 2);
        assert_eq!(page_two.structure.cells[0].text.as_deref(), Some("Contents"));
        let page_one = merged[0].bboxes[0].table_content.as_ref().unwrap();
        assert_eq!(page_one.structure.cells[0].text.as_deref(), Some(""));
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let layouts = vec![page_layout(1, vec![LayoutBox::new(Rect::new(0.0, 0.0, 10.0, 10.0), "Table", 0)])];
        let texts = vec![PageText::new(Vec::new(), Rect::from_size(100, 100))];
        let err = merge_document(&layouts, &texts, Vec::new()).unwrap_err();
        assert!(err.to_string().starts_with("merge failed"));
    }
}
