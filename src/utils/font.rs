//! Locates, downloads and loads the overlay font.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use tracing::{info, warn};

use crate::core::constants::{DEFAULT_FONT_DIR, FONT_DOWNLOAD_BASE, FONT_FILE_NAME};
use crate::core::errors::{BatchError, ProcessingStage};

/// Where the font lives under `font_dir`, or under the default directory.
pub fn font_path(font_dir: Option<&Path>) -> PathBuf {
    font_dir
        .unwrap_or_else(|| Path::new(DEFAULT_FONT_DIR))
        .join(FONT_FILE_NAME)
}

/// Returns the font path, downloading the font first if it is missing.
pub fn ensure_font(font_dir: Option<&Path>) -> Result<PathBuf, BatchError> {
    let path = font_path(font_dir);
    if path.exists() {
        return Ok(path);
    }

    let url = format!("{FONT_DOWNLOAD_BASE}/{FONT_FILE_NAME}");
    info!("Downloading font from {}", url);
    let download_err = |e: reqwest::Error| {
        BatchError::processing_with_source(ProcessingStage::Visualization, format!("download {url}"), e)
    };
    let bytes = reqwest::blocking::get(&url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(download_err)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("ttf.part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&partial, &path)?;
    Ok(path)
}

/// Parses a TrueType font file.
pub fn load_font(path: &Path) -> Result<FontVec, BatchError> {
    let data = fs::read(path)?;
    FontVec::try_from_vec(data).map_err(|_| {
        BatchError::processing(
            ProcessingStage::Visualization,
            format!("Failed to parse font file: {}", path.display()),
        )
    })
}

/// The overlay font, or `None` when it can be neither found nor fetched.
pub fn acquire_font(font_dir: Option<&Path>) -> Option<FontVec> {
    match ensure_font(font_dir).and_then(|path| load_font(&path)) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("No overlay font, labels will be skipped: {}", e);
            None
        }
    }
}
