//! A backend that serves predictions recorded on disk.
//!
//! Reads the per-stage files written in debug mode
//! (`<id>_layout.json`, `<id>_detection.json`, `<id>_text.json`,
//! `<id>_tables.json`), so a run can be merged and rendered again without an
//! inference runtime, or fed from predictions made elsewhere.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    DetectionModel, LayoutModel, ModelLoadError, ModelLoader, ModelSuite, PageBatch,
    RecognitionModel, RecognitionOptions, TableRecModel,
};
use crate::core::errors::BatchError;
use crate::domain::{
    DocumentId, PageDetection, PageLayout, PageText, RecognizedTable, TableStructure,
};
use crate::pipeline::output::{STAGE_DETECTION, STAGE_LAYOUT, STAGE_TABLES, STAGE_TEXT, stage_dump_path};
use crate::processors::Rect;

/// Loads [`ReplayModels`] reading from one directory.
#[derive(Debug, Clone)]
pub struct ReplayLoader {
    dir: PathBuf,
}

impl ReplayLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ModelLoader for ReplayLoader {
    fn load(&self, gpu: u32) -> Result<ModelSuite, ModelLoadError> {
        if !self.dir.is_dir() {
            return Err(ModelLoadError::Failed {
                gpu,
                message: format!("prediction directory {} does not exist", self.dir.display()),
            });
        }
        debug!("GPU {}: serving predictions from {}", gpu, self.dir.display());
        let models = Rc::new(ReplayModels::new(&self.dir));
        Ok(ModelSuite {
            layout: Box::new(Rc::clone(&models)),
            detection: Box::new(Rc::clone(&models)),
            recognition: Box::new(Rc::clone(&models)),
            table_rec: Box::new(models),
        })
    }
}

/// Recorded predictions for every stage.
#[derive(Debug, Clone)]
pub struct ReplayModels {
    dir: PathBuf,
}

impl ReplayModels {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Reads the `stage` dump of `id`; `Ok(None)` if no dump exists.
    fn read_stage<T: DeserializeOwned>(
        &self,
        id: &DocumentId,
        stage: &str,
    ) -> Result<Option<Vec<T>>, BatchError> {
        let path = stage_dump_path(&self.dir, id, stage);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut by_document: BTreeMap<String, Vec<T>> = serde_json::from_slice(&bytes)?;
        by_document.remove(id.as_str()).map(Some).ok_or_else(|| {
            BatchError::inference(
                stage,
                format!("{} has no entry for document {}", path.display(), id),
            )
        })
    }

    fn require_stage<T: DeserializeOwned>(
        &self,
        id: &DocumentId,
        stage: &str,
    ) -> Result<Vec<T>, BatchError> {
        self.read_stage(id, stage)?.ok_or_else(|| {
            BatchError::inference(stage, format!("no recorded {stage} predictions for {id}"))
        })
    }
}

impl LayoutModel for ReplayModels {
    fn predict(&self, batch: &PageBatch<'_>) -> Result<Vec<PageLayout>, BatchError> {
        let pages: Vec<PageLayout> = self.require_stage(batch.document_id, STAGE_LAYOUT)?;
        BatchError::check_batch_len(STAGE_LAYOUT, batch.len(), pages.len())?;
        Ok(pages)
    }
}

impl DetectionModel for ReplayModels {
    fn detect(&self, batch: &PageBatch<'_>) -> Result<Vec<PageDetection>, BatchError> {
        match self.read_stage::<PageDetection>(batch.document_id, STAGE_DETECTION)? {
            Some(pages) => {
                BatchError::check_batch_len(STAGE_DETECTION, batch.len(), pages.len())?;
                Ok(pages)
            }
            // Detection is auxiliary; an absent dump means no candidates.
            None => Ok(batch
                .images
                .iter()
                .map(|img| PageDetection {
                    bboxes: Vec::new(),
                    image_bbox: Rect::from_size(img.width(), img.height()),
                })
                .collect()),
        }
    }
}

impl RecognitionModel for ReplayModels {
    fn recognize(
        &self,
        batch: &PageBatch<'_>,
        _detector: &dyn DetectionModel,
        _options: RecognitionOptions,
    ) -> Result<Vec<PageText>, BatchError> {
        let pages: Vec<PageText> = self.require_stage(batch.document_id, STAGE_TEXT)?;
        BatchError::check_batch_len(STAGE_TEXT, batch.len(), pages.len())?;
        Ok(pages)
    }
}

impl TableRecModel for ReplayModels {
    fn recognize_tables(&self, crops: &PageBatch<'_>) -> Result<Vec<TableStructure>, BatchError> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }
        let tables: Vec<RecognizedTable> = self.require_stage(crops.document_id, STAGE_TABLES)?;
        BatchError::check_batch_len(STAGE_TABLES, crops.len(), tables.len())?;
        Ok(tables.into_iter().map(|t| t.structure).collect())
    }
}

impl<M: LayoutModel + ?Sized> LayoutModel for Rc<M> {
    fn predict(&self, batch: &PageBatch<'_>) -> Result<Vec<PageLayout>, BatchError> {
        (**self).predict(batch)
    }
}

impl<M: DetectionModel + ?Sized> DetectionModel for Rc<M> {
    fn detect(&self, batch: &PageBatch<'_>) -> Result<Vec<PageDetection>, BatchError> {
        (**self).detect(batch)
    }
}

impl<M: RecognitionModel + ?Sized> RecognitionModel for Rc<M> {
    fn recognize(
        &self,
        batch: &PageBatch<'_>,
        detector: &dyn DetectionModel,
        options: RecognitionOptions,
    ) -> Result<Vec<PageText>, BatchError> {
        (**self).recognize(batch, detector, options)
    }
}

impl<M: TableRecModel + ?Sized> TableRecModel for Rc<M> {
    fn recognize_tables(&self, crops: &PageBatch<'_>) -> Result<Vec<TableStructure>, BatchError> {
        (**self).recognize_tables(crops)
    }
}
