//! Table structure recognition result types.
//!
//! The table model sees a crop of the high-resolution page, so every box it
//! returns is crop-local. [`TableStructure::rebase`] fills the `adjusted_bbox`
//! fields with full-page coordinates; the merge engine only reads those.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::processors::Rect;

/// A row of a recognized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub bbox: Rect,
    pub row_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_bbox: Option<Rect>,
}

/// A column of a recognized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCol {
    pub bbox: Rect,
    pub col_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_bbox: Option<Rect>,
}

/// A cell in a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    /// Crop-local bounds.
    pub bbox: Rect,
    /// Row index (0-based)
    pub row_id: usize,
    /// Column index (0-based)
    pub col_id: usize,
    /// Full-page bounds, set by [`TableStructure::rebase`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_bbox: Option<Rect>,
    /// Text assigned by the merge engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TableCell {
    pub fn new(bbox: Rect, row_id: usize, col_id: usize) -> Self {
        Self {
            bbox,
            row_id,
            col_id,
            adjusted_bbox: None,
            text: None,
        }
    }

    /// Sets the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Rows, columns and cells recognized in one table crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub cols: Vec<TableCol>,
    #[serde(default)]
    pub cells: Vec<TableCell>,
    /// Bounds of the crop the structure was recognized on.
    pub image_bbox: Rect,
}

impl TableStructure {
    /// Fills every `adjusted_bbox` with the crop-local box shifted by `(dx, dy)`.
    ///
    /// Offsets are truncated to whole pixels so adjusted boxes land on the
    /// pixel grid of the page the crop was cut from.
    pub fn rebase(mut self, dx: f32, dy: f32) -> Self {
        let (dx, dy) = (dx.trunc(), dy.trunc());
        for row in &mut self.rows {
            row.adjusted_bbox = Some(row.bbox.translate(dx, dy).trunc());
        }
        for col in &mut self.cols {
            col.adjusted_bbox = Some(col.bbox.translate(dx, dy).trunc());
        }
        for cell in &mut self.cells {
            cell.adjusted_bbox = Some(cell.bbox.translate(dx, dy).trunc());
        }
        self
    }

    /// Renders the cell grid as CSV.
    ///
    /// Missing cells are empty fields and rows end in `\n` with no trailing
    /// terminator. Fields are quoted only when they must be; a row holding a
    /// single empty field stays an empty line. Returns an empty string for a
    /// table without cells.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        if self.cells.is_empty() {
            return Ok(String::new());
        }

        let mut grid: BTreeMap<(usize, usize), String> = BTreeMap::new();
        let mut max_row = 0;
        let mut max_col = 0;
        for cell in &self.cells {
            let text = cell
                .text
                .as_deref()
                .unwrap_or_default()
                .trim()
                .replace('\n', " ");
            grid.insert((cell.row_id, cell.col_id), text);
            max_row = max_row.max(cell.row_id);
            max_col = max_col.max(cell.col_id);
        }

        let rows = (0..=max_row)
            .map(|r| {
                let fields: Vec<&str> = (0..=max_col)
                    .map(|c| grid.get(&(r, c)).map(String::as_str).unwrap_or_default())
                    .collect();
                csv_row(&fields)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.join("\n"))
    }
}

fn csv_row(fields: &[&str]) -> Result<String, csv::Error> {
    if let [""] = fields {
        return Ok(String::new());
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;

    let mut row = String::from_utf8_lossy(&bytes).into_owned();
    if row.ends_with('\n') {
        row.pop();
    }
    Ok(row)
}

/// A table structure tied back to the page region it was cropped from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedTable {
    /// 1-based page number.
    pub page: usize,
    /// Index of the table among the table regions of its page.
    pub table_idx: usize,
    /// The crop bounds in full-page coordinates.
    pub adjusted_image_bbox: Rect,
    #[serde(flatten)]
    pub structure: TableStructure,
}

impl RecognizedTable {
    /// Rebases `structure`, recognized on a crop of `region`, into page space.
    pub fn from_crop(page: usize, table_idx: usize, region: &Rect, structure: TableStructure) -> Self {
        let (dx, dy) = (region.x_min.trunc(), region.y_min.trunc());
        let adjusted_image_bbox = structure.image_bbox.translate(dx, dy).trunc();
        Self {
            page,
            table_idx,
            adjusted_image_bbox,
            structure: structure.rebase(dx, dy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> TableStructure {
        TableStructure {
            rows: vec![
                TableRow { bbox: Rect::new(0.0, 0.0, 100.0, 20.0), row_id: 0, adjusted_bbox: None },
                TableRow { bbox: Rect::new(0.0, 20.0, 100.0, 40.0), row_id: 1, adjusted_bbox: None },
            ],
            cols: vec![
                TableCol { bbox: Rect::new(0.0, 0.0, 50.0, 40.0), col_id: 0, adjusted_bbox: None },
                TableCol { bbox: Rect::new(50.0, 0.0, 100.0, 40.0), col_id: 1, adjusted_bbox: None },
            ],
            cells: vec![
                TableCell::new(Rect::new(0.0, 0.0, 50.0, 20.0), 0, 0),
                TableCell::new(Rect::new(50.0, 0.0, 100.0, 20.0), 0, 1),
                TableCell::new(Rect::new(0.0, 20.0, 50.0, 40.0), 1, 0),
                TableCell::new(Rect::new(50.0, 20.0, 100.0, 40.0), 1, 1),
            ],
            image_bbox: Rect::new(0.0, 0.0, 100.0, 40.0),
        }
    }

    #[test]
    fn test_from_crop_rebases_every_box() {
        let region = Rect::new(30.7, 200.2, 130.7, 240.2);
        let table = RecognizedTable::from_crop(2, 0, &region, two_by_two());

        assert_eq!(table.adjusted_image_bbox, Rect::new(30.0, 200.0, 130.0, 240.0));
        assert_eq!(
            table.structure.cells[3].adjusted_bbox,
            Some(Rect::new(80.0, 220.0, 130.0, 240.0))
        );
        assert_eq!(
            table.structure.rows[1].adjusted_bbox,
            Some(Rect::new(30.0, 220.0, 130.0, 240.0))
        );
        assert_eq!(
            table.structure.cols[0].adjusted_bbox,
            Some(Rect::new(30.0, 200.0, 80.0, 240.0))
        );
        // Crop-local boxes are kept as recognized.
        assert_eq!(table.structure.cells[3].bbox, Rect::new(50.0, 20.0, 100.0, 40.0));
    }

    #[test]
    fn test_to_csv_escapes_and_fills_gaps() {
        let mut table = two_by_two();
        table.cells[0].text = Some("Name".into());
        table.cells[1].text = Some("Qty, total".into());
        table.cells[2].text = Some("say \"hi\"".into());
        table.cells.pop();

        assert_eq!(
            table.to_csv().unwrap(),
            "Name,\"Qty, total\"\n\"say \"\"hi\"\"\","
        );
    }

    #[test]
    fn test_to_csv_single_empty_field_is_blank_line() {
        let table = TableStructure {
            rows: Vec::new(),
            cols: Vec::new(),
            cells: vec![
                TableCell::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0, 0).with_text("Total"),
                TableCell::new(Rect::new(0.0, 10.0, 10.0, 20.0), 1, 0),
                TableCell::new(Rect::new(0.0, 20.0, 10.0, 30.0), 2, 0).with_text("  "),
                TableCell::new(Rect::new(0.0, 30.0, 10.0, 40.0), 3, 0).with_text("12"),
            ],
            image_bbox: Rect::new(0.0, 0.0, 10.0, 40.0),
        };
        assert_eq!(table.to_csv().unwrap(), "Total\n\n\n12");
    }

    #[test]
    fn test_to_csv_empty_fields_in_wide_rows_stay_bare() {
        let mut table = two_by_two();
        table.cells[1].text = Some("x".into());
        assert_eq!(table.to_csv().unwrap(), ",x\n,");
    }

    #[test]
    fn test_to_csv_without_cells_is_empty() {
        let mut table = two_by_two();
        table.cells.clear();
        assert_eq!(table.to_csv().unwrap(), "");
    }

    #[test]
    fn test_recognized_table_flattens_structure() {
        let table = RecognizedTable::from_crop(1, 0, &Rect::new(0.0, 0.0, 100.0, 40.0), two_by_two());
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["page"], 1);
        assert_eq!(value["cells"].as_array().unwrap().len(), 4);
        assert!(value.get("structure").is_none());
    }
}
