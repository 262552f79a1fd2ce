//! Where a run writes its artifacts.
//!
//! ```text
//! <output>/checkpoint.json (+ .lock)
//! <output>/assets/<id>/<page>_<label>_<position>.png
//! <output>/with_layout/<id>.json
//! <output>/raw/<id>_raw_text.json
//! <output>/debug/<id>_{layout,detection,text,tables}.json
//! <output>/images/{layout,bboxes,layout_w_bbox,text,table}/<id>/*.png
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::constants::CHECKPOINT_FILE_NAME;
use crate::core::errors::{BatchError, ProcessingStage};
use crate::domain::DocumentId;

pub const STAGE_LAYOUT: &str = "layout";
pub const STAGE_DETECTION: &str = "detection";
pub const STAGE_TEXT: &str = "text";
pub const STAGE_TABLES: &str = "tables";

/// Path of the `stage` dump of `id` inside `dir`.
pub fn stage_dump_path(dir: &Path, id: &DocumentId, stage: &str) -> PathBuf {
    dir.join(format!("{id}_{stage}.json"))
}

/// Overlay families written in save-images mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Layout,
    Bboxes,
    LayoutWithBboxes,
    Text,
    Table,
}

impl OverlayKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            OverlayKind::Layout => "layout",
            OverlayKind::Bboxes => "bboxes",
            OverlayKind::LayoutWithBboxes => "layout_w_bbox",
            OverlayKind::Text => "text",
            OverlayKind::Table => "table",
        }
    }
}

/// Paths under one output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE_NAME)
    }

    pub fn asset_path(&self, id: &DocumentId, page: usize, label: &str, position: usize) -> PathBuf {
        self.root
            .join("assets")
            .join(id.as_str())
            .join(format!("{page}_{label}_{position}.png"))
    }

    pub fn merged_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join("with_layout").join(format!("{id}.json"))
    }

    pub fn raw_text_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join("raw").join(format!("{id}_raw_text.json"))
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }

    pub fn debug_path(&self, id: &DocumentId, stage: &str) -> PathBuf {
        stage_dump_path(&self.debug_dir(), id, stage)
    }

    pub fn overlay_dir(&self, kind: OverlayKind, id: &DocumentId) -> PathBuf {
        self.root.join("images").join(kind.dir_name()).join(id.as_str())
    }
}

fn ensure_parent(path: &Path) -> Result<(), BatchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            BatchError::processing_with_source(
                ProcessingStage::Output,
                format!("create {}", parent.display()),
                e,
            )
        })?;
    }
    Ok(())
}

/// Writes `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), BatchError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| {
        BatchError::processing_with_source(ProcessingStage::Output, format!("create {}", path.display()), e)
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Writes `items` keyed by document, `{"<id>": [...]}`.
pub fn write_document_json<T: Serialize>(
    path: &Path,
    id: &DocumentId,
    items: &[T],
) -> Result<(), BatchError> {
    let by_document: BTreeMap<&str, &[T]> = BTreeMap::from([(id.as_str(), items)]);
    write_json(path, &by_document)
}

/// Saves an image, creating parent directories.
pub fn save_image(path: &Path, image: &image::RgbImage) -> Result<(), BatchError> {
    ensure_parent(path)?;
    image.save(path).map_err(|e| {
        BatchError::processing_with_source(ProcessingStage::Output, format!("save {}", path.display()), e)
    })
}
