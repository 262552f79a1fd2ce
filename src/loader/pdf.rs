//! PDF rasterization through PDFium.

use std::path::{Path, PathBuf};

use image::RgbImage;
use once_cell::unsync::OnceCell;
use pdfium_render::prelude::*;
use tracing::debug;

use super::{LoaderError, PageSet, RenderedPage, Rasterizer, resolve_pages};
use crate::core::constants::PDF_POINTS_PER_INCH;

/// Renders PDF pages with PDFium.
///
/// The shared library is bound lazily, the first time a PDF is rendered, so
/// a run over raster images never needs PDFium installed. A failed bind is
/// reported per document.
pub struct PdfiumRasterizer {
    library_dir: Option<PathBuf>,
    pdfium: OnceCell<Pdfium>,
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self {
            library_dir: None,
            pdfium: OnceCell::new(),
        }
    }

    /// Looks for the PDFium library in `dir` before the default locations.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    fn pdfium(&self) -> Result<&Pdfium, LoaderError> {
        self.pdfium
            .get_or_try_init(|| bind_pdfium(self.library_dir.as_deref()).map(Pdfium::new))
    }

    fn render_page(page: &PdfPage, number: usize, dpi: f32) -> Result<RgbImage, LoaderError> {
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi / PDF_POINTS_PER_INCH)
            .render_annotations(false);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| LoaderError::Render {
                page: number,
                message: e.to_string(),
            })?;

        Ok(bitmap.as_image().to_rgb8())
    }
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn bind_pdfium(library_dir: Option<&Path>) -> Result<Box<dyn PdfiumLibraryBindings>, LoaderError> {
    let search_dirs = library_dir
        .map(Path::to_path_buf)
        .into_iter()
        .chain(["./", "/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"].map(PathBuf::from));

    for dir in search_dirs {
        if let Ok(bindings) =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        {
            debug!("Bound PDFium from {}", dir.display());
            return Ok(bindings);
        }
    }

    Pdfium::bind_to_system_library()
        .map_err(|e| LoaderError::Init(format!("Could not find PDFium library: {e}")))
}

impl Rasterizer for PdfiumRasterizer {
    fn render(
        &self,
        path: &Path,
        pages: Option<&PageSet>,
        dpis: &[f32],
    ) -> Result<Vec<RenderedPage>, LoaderError> {
        let document = self
            .pdfium()?
            .load_pdf_from_file(path, None)
            .map_err(|e| LoaderError::Load {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let page_count = document.pages().len() as usize;
        if page_count == 0 {
            return Err(LoaderError::EmptyPdf);
        }

        let indices = resolve_pages(pages, page_count)?;
        debug!(
            "Rendering {} of {} pages from {}",
            indices.len(),
            page_count,
            path.display()
        );

        let mut rendered = Vec::with_capacity(indices.len());
        for idx in indices {
            let number = idx + 1;
            let index = idx.try_into().map_err(|_| LoaderError::Render {
                page: number,
                message: "page index exceeds PDFium range".into(),
            })?;
            let page = document
                .pages()
                .get(index)
                .map_err(|e| LoaderError::Render {
                    page: number,
                    message: e.to_string(),
                })?;

            let images = dpis
                .iter()
                .map(|&dpi| Self::render_page(&page, number, dpi))
                .collect::<Result<Vec<_>, _>>()?;
            rendered.push(RenderedPage { number, images });
        }

        Ok(rendered)
    }
}
