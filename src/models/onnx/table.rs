//! SLANet table structure recognition.

use std::collections::{BTreeMap, HashSet};

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

use super::preprocess::Normalize;
use super::session::{OnnxSession, tensor_view};
use crate::core::errors::BatchError;
use crate::domain::{TableCell, TableCol, TableRow, TableStructure};
use crate::models::{PageBatch, TableRecModel};
use crate::processors::Rect;

/// Side of the square SLANet input.
pub const TABLE_INPUT_SIZE: u32 = 488;

const SOS: &str = "sos";
const EOS: &str = "eos";
const EMPTY_CELL: &str = "<td></td>";

/// Decodes SLANet structure tokens and cell boxes into a [`TableStructure`].
///
/// The dictionary gets `sos` prepended and `eos` appended; a bare `<td>` is
/// replaced by `<td></td>`.
#[derive(Debug, Clone)]
pub struct TableStructureDecoder {
    tokens: Vec<String>,
}

/// A cell whose span attributes may still follow.
struct OpenCell {
    bbox: Rect,
    col_span: usize,
    row_span: usize,
}

/// Places cells on the grid, skipping slots covered by earlier rowspans.
#[derive(Default)]
struct Grid {
    row: usize,
    col: usize,
    occupied: HashSet<(usize, usize)>,
    cells: Vec<TableCell>,
}

impl Grid {
    fn place(&mut self, cell: OpenCell) {
        while self.occupied.contains(&(self.row, self.col)) {
            self.col += 1;
        }
        for r in 1..cell.row_span {
            for c in 0..cell.col_span {
                self.occupied.insert((self.row + r, self.col + c));
            }
        }
        self.cells.push(TableCell::new(cell.bbox, self.row, self.col));
        self.col += cell.col_span;
    }
}

impl TableStructureDecoder {
    pub fn from_dictionary(entries: impl IntoIterator<Item = String>) -> Self {
        let mut dict: Vec<String> = entries.into_iter().filter(|t| t != "<td>").collect();
        if !dict.iter().any(|t| t == EMPTY_CELL) {
            dict.push(EMPTY_CELL.to_string());
        }
        let mut tokens = Vec::with_capacity(dict.len() + 2);
        tokens.push(SOS.to_string());
        tokens.extend(dict);
        tokens.push(EOS.to_string());
        Self { tokens }
    }

    fn eos(&self) -> usize {
        self.tokens.len() - 1
    }

    /// Decodes one crop of `width`x`height` pixels.
    ///
    /// `structure` holds `classes` scores per step and `locations` holds
    /// `coords` (4 or 8) normalized coordinates per step, relative to the
    /// crop's longest side.
    pub fn decode(
        &self,
        structure: &[f32],
        classes: usize,
        locations: &[f32],
        coords: usize,
        width: u32,
        height: u32,
    ) -> TableStructure {
        let scale = width.max(height) as f32;
        let mut grid = Grid::default();
        let mut open: Option<OpenCell> = None;

        for (step, scores) in structure.chunks_exact(classes.max(1)).enumerate() {
            let index = argmax(scores);
            if index == self.eos() && step > 0 {
                break;
            }
            if index == 0 || index == self.eos() {
                continue;
            }
            let Some(token) = self.tokens.get(index).map(String::as_str) else {
                continue;
            };

            let starts_cell = token.starts_with("<td");
            if starts_cell || token == "<tr>" || token == "</tr>" {
                if let Some(cell) = open.take() {
                    grid.place(cell);
                }
            }

            if token == "<tr>" {
                grid.col = 0;
            } else if token == "</tr>" {
                grid.row += 1;
            } else if starts_cell {
                let location = locations.get(step * coords..(step + 1) * coords).unwrap_or(&[]);
                let mut cell = OpenCell {
                    bbox: cell_rect(location, scale, width, height),
                    col_span: 1,
                    row_span: 1,
                };
                read_spans(token, &mut cell);
                open = Some(cell);
            } else if let Some(cell) = open.as_mut() {
                read_spans(token, cell);
            }
        }
        if let Some(cell) = open.take() {
            grid.place(cell);
        }

        let cells = grid.cells;
        let mut rows: BTreeMap<usize, Rect> = BTreeMap::new();
        let mut cols: BTreeMap<usize, Rect> = BTreeMap::new();
        for cell in &cells {
            rows.entry(cell.row_id)
                .and_modify(|r| *r = union(r, &cell.bbox))
                .or_insert(cell.bbox);
            cols.entry(cell.col_id)
                .and_modify(|r| *r = union(r, &cell.bbox))
                .or_insert(cell.bbox);
        }

        TableStructure {
            rows: rows
                .into_iter()
                .map(|(row_id, bbox)| TableRow {
                    bbox,
                    row_id,
                    adjusted_bbox: None,
                })
                .collect(),
            cols: cols
                .into_iter()
                .map(|(col_id, bbox)| TableCol {
                    bbox,
                    col_id,
                    adjusted_bbox: None,
                })
                .collect(),
            cells,
            image_bbox: Rect::from_size(width, height),
        }
    }
}

fn argmax(scores: &[f32]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
        .0
}

/// Reads `colspan="n"` / `rowspan="n"` out of a token.
fn read_spans(token: &str, cell: &mut OpenCell) {
    if let Some(n) = span_attr(token, "colspan") {
        cell.col_span = n;
    }
    if let Some(n) = span_attr(token, "rowspan") {
        cell.row_span = n;
    }
}

fn span_attr(token: &str, attr: &str) -> Option<usize> {
    let pattern = format!("{attr}=\"");
    let start = token.find(&pattern)? + pattern.len();
    let end = token[start..].find('"')?;
    token[start..start + end].parse().ok().filter(|&n| n > 0)
}

/// Axis-aligned box of a 4- or 8-value location, in crop pixels.
fn cell_rect(location: &[f32], scale: f32, width: u32, height: u32) -> Rect {
    let (xs, ys): (Vec<f32>, Vec<f32>) = location
        .chunks_exact(2)
        .map(|p| (p[0] * scale, p[1] * scale))
        .unzip();
    if xs.is_empty() {
        return Rect::new(0.0, 0.0, 0.0, 0.0);
    }
    let min = |v: &[f32]| v.iter().copied().fold(f32::INFINITY, f32::min);
    let max = |v: &[f32]| v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Rect::new(
        min(&xs).clamp(0.0, width as f32),
        min(&ys).clamp(0.0, height as f32),
        max(&xs).clamp(0.0, width as f32),
        max(&ys).clamp(0.0, height as f32),
    )
}

fn union(a: &Rect, b: &Rect) -> Rect {
    Rect::new(
        a.x_min.min(b.x_min),
        a.y_min.min(b.y_min),
        a.x_max.max(b.x_max),
        a.y_max.max(b.y_max),
    )
}

/// Table recognition model backed by an ONNX session.
#[derive(Debug)]
pub struct OnnxTableRecognizer {
    session: OnnxSession,
    decoder: TableStructureDecoder,
    batch_size: usize,
}

impl OnnxTableRecognizer {
    pub fn new(session: OnnxSession, decoder: TableStructureDecoder, batch_size: usize) -> Self {
        Self {
            session,
            decoder,
            batch_size: batch_size.max(1),
        }
    }

    fn recognize_chunk(&self, crops: &[RgbImage]) -> Result<Vec<TableStructure>, BatchError> {
        let side = TABLE_INPUT_SIZE as usize;
        let mut pixels = Array4::<f32>::zeros((crops.len(), 3, side, side));
        for (slot, crop) in crops.iter().enumerate() {
            let ratio = TABLE_INPUT_SIZE as f32 / crop.width().max(crop.height()).max(1) as f32;
            let w = ((crop.width() as f32 * ratio).round() as u32).clamp(1, TABLE_INPUT_SIZE);
            let h = ((crop.height() as f32 * ratio).round() as u32).clamp(1, TABLE_INPUT_SIZE);
            let resized = imageops::resize(crop, w, h, FilterType::Triangle);
            Normalize::IMAGENET.write(&resized, &mut pixels, slot);
        }

        let input = tensor_view(&pixels).map_err(|e| self.session.error("input tensor", e))?;
        let mut session = self.session.lock()?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| self.session.error("forward pass", e))?;
        let first = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| self.session.error("output extraction", e))?;
        let second = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| self.session.error("output extraction", e))?;

        // One output is [N, L, 4|8] cell locations, the other [N, L, vocab].
        let is_location = |shape: &[i64]| matches!(shape.last(), Some(4) | Some(8));
        let ((loc_shape, locations), (struct_shape, structure)) = if is_location(&first.0[..]) {
            (first, second)
        } else {
            (second, first)
        };
        if loc_shape.len() != 3
            || struct_shape.len() != 3
            || struct_shape[0] as usize != crops.len()
            || loc_shape[0] as usize != crops.len()
        {
            return Err(BatchError::inference(
                self.session.name(),
                format!(
                    "unexpected output shapes {:?} and {:?} for {} crops",
                    &struct_shape[..],
                    &loc_shape[..],
                    crops.len()
                ),
            ));
        }

        let (steps, classes) = (struct_shape[1] as usize, struct_shape[2] as usize);
        let coords = loc_shape[2] as usize;
        Ok(crops
            .iter()
            .enumerate()
            .map(|(slot, crop)| {
                let structure = &structure[slot * steps * classes..(slot + 1) * steps * classes];
                let loc_steps = loc_shape[1] as usize;
                let locations = &locations[slot * loc_steps * coords..(slot + 1) * loc_steps * coords];
                self.decoder
                    .decode(structure, classes, locations, coords, crop.width(), crop.height())
            })
            .collect())
    }
}

impl TableRecModel for OnnxTableRecognizer {
    fn recognize_tables(&self, crops: &PageBatch<'_>) -> Result<Vec<TableStructure>, BatchError> {
        let mut tables = Vec::with_capacity(crops.len());
        for chunk in crops.images.chunks(self.batch_size) {
            tables.extend(self.recognize_chunk(chunk)?);
        }
        Ok(tables)
    }
}
