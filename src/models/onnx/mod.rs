//! ONNX Runtime backend.
//!
//! Loads four Paddle-exported models from one directory:
//!
//! | file          | model                                    |
//! |---------------|------------------------------------------|
//! | `layout.onnx` | RT-DETR layout detection (PP-DocLayout)  |
//! | `det.onnx`    | DB text detection                        |
//! | `rec.onnx`    | CRNN text recognition, with `rec_dict.txt` |
//! | `table.onnx`  | SLANet table structure, with `table_dict.txt` |
//!
//! An optional `layout_labels.txt` replaces the PP-DocLayout class names,
//! one pipeline label per line in model order.

mod detection;
mod layout;
mod preprocess;
mod recognition;
mod session;
mod table;

pub use detection::{DbPostProcess, OnnxTextDetector};
pub use layout::{LayoutDecoder, OnnxLayoutModel, PP_DOCLAYOUT_LABELS, RawDetection};
pub use recognition::{CtcDecoder, OnnxTextRecognizer};
pub use session::{OnnxSession, SessionOptions, classify_load_error};
pub use table::{OnnxTableRecognizer, TableStructureDecoder};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ModelLoadError, ModelLoader, ModelSuite};

pub const LAYOUT_MODEL_FILE: &str = "layout.onnx";
pub const DETECTION_MODEL_FILE: &str = "det.onnx";
pub const RECOGNITION_MODEL_FILE: &str = "rec.onnx";
pub const TABLE_MODEL_FILE: &str = "table.onnx";
pub const RECOGNITION_DICT_FILE: &str = "rec_dict.txt";
pub const TABLE_DICT_FILE: &str = "table_dict.txt";
pub const LAYOUT_LABELS_FILE: &str = "layout_labels.txt";

const REQUIRED_FILES: [&str; 6] = [
    LAYOUT_MODEL_FILE,
    DETECTION_MODEL_FILE,
    RECOGNITION_MODEL_FILE,
    TABLE_MODEL_FILE,
    RECOGNITION_DICT_FILE,
    TABLE_DICT_FILE,
];

/// Settings of the ONNX backend, carried in the worker manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnnxConfig {
    /// Directory holding the model and dictionary files.
    pub model_dir: PathBuf,
    /// Run on the CUDA execution provider (needs the `cuda` feature).
    #[serde(default = "default_use_cuda")]
    pub use_cuda: bool,
    /// Cap on each session's CUDA memory arena, in bytes.
    #[serde(default)]
    pub gpu_mem_limit: Option<usize>,
    #[serde(default)]
    pub intra_threads: Option<usize>,
    /// Minimum score of a layout region.
    #[serde(default = "default_layout_threshold")]
    pub layout_threshold: f32,
    /// Layout model input as `[width, height]`.
    #[serde(default = "default_layout_input")]
    pub layout_input_size: [u32; 2],
    #[serde(default = "default_det_thresh")]
    pub det_thresh: f32,
    #[serde(default = "default_det_box_thresh")]
    pub det_box_thresh: f32,
    #[serde(default = "default_det_unclip_ratio")]
    pub det_unclip_ratio: f32,
    /// Longest side a page is shrunk to before detection.
    #[serde(default = "default_det_limit_side_len")]
    pub det_limit_side_len: u32,
    #[serde(default = "default_rec_batch_size")]
    pub rec_batch_size: usize,
    #[serde(default = "default_table_batch_size")]
    pub table_batch_size: usize,
}

fn default_use_cuda() -> bool {
    true
}

fn default_layout_threshold() -> f32 {
    0.5
}

fn default_layout_input() -> [u32; 2] {
    [640, 640]
}

fn default_det_thresh() -> f32 {
    0.3
}

fn default_det_box_thresh() -> f32 {
    0.6
}

fn default_det_unclip_ratio() -> f32 {
    1.5
}

fn default_det_limit_side_len() -> u32 {
    960
}

fn default_rec_batch_size() -> usize {
    32
}

fn default_table_batch_size() -> usize {
    8
}

impl OnnxConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            use_cuda: default_use_cuda(),
            gpu_mem_limit: None,
            intra_threads: None,
            layout_threshold: default_layout_threshold(),
            layout_input_size: default_layout_input(),
            det_thresh: default_det_thresh(),
            det_box_thresh: default_det_box_thresh(),
            det_unclip_ratio: default_det_unclip_ratio(),
            det_limit_side_len: default_det_limit_side_len(),
            rec_batch_size: default_rec_batch_size(),
            table_batch_size: default_table_batch_size(),
        }
    }

    pub fn with_use_cuda(mut self, use_cuda: bool) -> Self {
        self.use_cuda = use_cuda;
        self
    }

    pub fn with_gpu_mem_limit(mut self, limit: Option<usize>) -> Self {
        self.gpu_mem_limit = limit;
        self
    }

    pub fn with_intra_threads(mut self, threads: Option<usize>) -> Self {
        self.intra_threads = threads;
        self
    }

    pub fn with_layout_threshold(mut self, threshold: f32) -> Self {
        self.layout_threshold = threshold;
        self
    }

    pub fn session_options(&self, device: u32) -> SessionOptions {
        SessionOptions {
            device,
            use_cuda: self.use_cuda,
            gpu_mem_limit: self.gpu_mem_limit,
            intra_threads: self.intra_threads,
        }
    }
}

/// Opens the four ONNX sessions on a worker's GPU.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    config: OnnxConfig,
}

impl OnnxLoader {
    pub fn new(config: OnnxConfig) -> Self {
        Self { config }
    }

    /// Fails with the list of files the model directory lacks.
    fn check_files(&self, gpu: u32) -> Result<(), ModelLoadError> {
        let dir = &self.config.model_dir;
        if !dir.is_dir() {
            return Err(ModelLoadError::Failed {
                gpu,
                message: format!("model directory {} does not exist", dir.display()),
            });
        }
        let missing: Vec<&str> = REQUIRED_FILES
            .iter()
            .copied()
            .filter(|file| !dir.join(file).is_file())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ModelLoadError::Failed {
                gpu,
                message: format!("{} is missing {}", dir.display(), missing.join(", ")),
            })
        }
    }
}

/// Non-empty lines of a dictionary file, trailing whitespace removed.
///
/// Leading spaces are kept: table attribute tokens such as ` colspan="2"`
/// start with one.
fn read_dictionary(path: &Path, gpu: u32) -> Result<Vec<String>, ModelLoadError> {
    let text = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Failed {
        gpu,
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

impl ModelLoader for OnnxLoader {
    fn load(&self, gpu: u32) -> Result<ModelSuite, ModelLoadError> {
        self.check_files(gpu)?;

        let config = &self.config;
        let dir = &config.model_dir;
        let options = config.session_options(gpu);
        let open = |file: &str| {
            OnnxSession::open(&dir.join(file), &options)
                .map_err(|e| classify_load_error(gpu, format!("{file}: {e}")))
        };

        let labels_path = dir.join(LAYOUT_LABELS_FILE);
        let labels = if labels_path.is_file() {
            read_dictionary(&labels_path, gpu)?
        } else {
            PP_DOCLAYOUT_LABELS.iter().map(|l| l.to_string()).collect()
        };
        let [layout_w, layout_h] = config.layout_input_size;

        let layout = OnnxLayoutModel::new(
            open(LAYOUT_MODEL_FILE)?,
            LayoutDecoder::new(labels, config.layout_threshold),
            (layout_w, layout_h),
        );
        let detection = OnnxTextDetector::new(
            open(DETECTION_MODEL_FILE)?,
            DbPostProcess::new(config.det_thresh, config.det_box_thresh, config.det_unclip_ratio),
            config.det_limit_side_len,
        );
        let recognition = OnnxTextRecognizer::new(
            open(RECOGNITION_MODEL_FILE)?,
            CtcDecoder::from_dictionary(read_dictionary(&dir.join(RECOGNITION_DICT_FILE), gpu)?),
            config.rec_batch_size,
        );
        let table_rec = OnnxTableRecognizer::new(
            open(TABLE_MODEL_FILE)?,
            TableStructureDecoder::from_dictionary(read_dictionary(&dir.join(TABLE_DICT_FILE), gpu)?),
            config.table_batch_size,
        );

        info!(
            "GPU {}: loaded ONNX models from {} (cuda: {})",
            gpu,
            dir.display(),
            config.use_cuda
        );
        Ok(ModelSuite {
            layout: Box::new(layout),
            detection: Box::new(detection),
            recognition: Box::new(recognition),
            table_rec: Box::new(table_rec),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults_from_manifest_json() {
        let config: OnnxConfig = serde_json::from_str(r#"{"model_dir": "models"}"#).unwrap();
        assert_eq!(config, OnnxConfig::new("models"));
        assert!(config.use_cuda);
        assert_eq!(config.layout_input_size, [640, 640]);
    }

    #[test]
    fn test_load_fails_on_missing_directory() {
        let dir = TempDir::new().unwrap();
        let loader = OnnxLoader::new(OnnxConfig::new(dir.path().join("absent")));

        let error = loader.load(3).err().unwrap();
        assert!(!error.is_out_of_memory());
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_names_missing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LAYOUT_MODEL_FILE), b"").unwrap();
        std::fs::write(dir.path().join(RECOGNITION_DICT_FILE), b"a\n").unwrap();
        let loader = OnnxLoader::new(OnnxConfig::new(dir.path()));

        let message = match loader.load(0) {
            Err(ModelLoadError::Failed { gpu: 0, message }) => message,
            other => panic!("unexpected result: {:?}", other.err()),
        };
        assert!(message.contains("det.onnx"));
        assert!(message.contains("table_dict.txt"));
        assert!(!message.contains("layout.onnx"));
    }

    #[test]
    fn test_corrupt_model_is_a_plain_failure() {
        let dir = TempDir::new().unwrap();
        for file in REQUIRED_FILES {
            std::fs::write(dir.path().join(file), b"not a model\n").unwrap();
        }
        let loader = OnnxLoader::new(OnnxConfig::new(dir.path()).with_use_cuda(false));

        match loader.load(0) {
            Err(ModelLoadError::Failed { message, .. }) => assert!(message.starts_with("layout.onnx")),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_dictionary_keeps_leading_spaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TABLE_DICT_FILE);
        std::fs::write(&path, "<tr>\n colspan=\"2\"  \n\n</tr>\n").unwrap();

        let entries = read_dictionary(&path, 0).unwrap();
        assert_eq!(entries, ["<tr>", " colspan=\"2\"", "</tr>"]);
    }
}
