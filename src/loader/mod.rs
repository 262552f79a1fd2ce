//! Document loading: rasterizing PDFs and decoding raster images into pages.
//!
//! The pipeline needs every page twice, once at a low DPI for layout and
//! detection and once at a high DPI for recognition. [`DocumentLoader`] hides
//! whether the pages come from a PDF renderer or from a single image file.

mod page_range;
mod pdf;

pub use page_range::{PageRangeError, PageSet};
pub use pdf::PdfiumRasterizer;

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::domain::DocumentKind;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to initialize PDFium: {0}")]
    Init(String),

    #[error("Failed to load PDF {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("Failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("PDF has no pages")]
    EmptyPdf,

    #[error("page {page} is out of range, document has {page_count} pages")]
    PageOutOfRange { page: u32, page_count: usize },

    #[error("Failed to decode image {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Converts an optional 1-based page selection into 0-based indices.
///
/// No selection means every page. Any selected page past the end of the
/// document is an error; nothing is clipped.
pub fn resolve_pages(pages: Option<&PageSet>, page_count: usize) -> Result<Vec<usize>, LoaderError> {
    match pages {
        None => Ok((0..page_count).collect()),
        Some(pages) => match pages.first_beyond(page_count) {
            Some(page) => Err(LoaderError::PageOutOfRange { page, page_count }),
            None => Ok(pages.iter().map(|page| page as usize - 1).collect()),
        },
    }
}

/// One page rendered at each requested DPI, in request order.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number in the source document.
    pub number: usize,
    pub images: Vec<RgbImage>,
}

/// Turns a paged document into raster images.
pub trait Rasterizer {
    /// Renders the selected pages at every DPI in `dpis`, opening the document once.
    fn render(
        &self,
        path: &Path,
        pages: Option<&PageSet>,
        dpis: &[f32],
    ) -> Result<Vec<RenderedPage>, LoaderError>;
}

/// Low- and high-resolution renderings of the same pages.
#[derive(Debug, Clone, Default)]
pub struct PageImages {
    /// 1-based page numbers, parallel to `low` and `high`.
    pub numbers: Vec<usize>,
    pub low: Vec<RgbImage>,
    pub high: Vec<RgbImage>,
}

impl PageImages {
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    /// Factors mapping low-resolution coordinates of page `idx` onto the high-resolution image.
    pub fn scale_factors(&self, idx: usize) -> (f32, f32) {
        match (self.low.get(idx), self.high.get(idx)) {
            (Some(low), Some(high)) if low.width() > 0 && low.height() > 0 => (
                high.width() as f32 / low.width() as f32,
                high.height() as f32 / low.height() as f32,
            ),
            _ => (1.0, 1.0),
        }
    }
}

/// Loads documents into page images.
pub struct DocumentLoader {
    rasterizer: Box<dyn Rasterizer>,
}

impl DocumentLoader {
    pub fn new(rasterizer: Box<dyn Rasterizer>) -> Self {
        Self { rasterizer }
    }

    /// Loads the low- and high-resolution renderings of a document.
    pub fn load_pair(
        &self,
        path: &Path,
        kind: DocumentKind,
        pages: Option<&PageSet>,
        low_dpi: f32,
        high_dpi: f32,
    ) -> Result<PageImages, LoaderError> {
        match kind {
            DocumentKind::Pdf => {
                let rendered = self.rasterizer.render(path, pages, &[low_dpi, high_dpi])?;
                let mut images = PageImages::default();
                for page in rendered {
                    let mut renders = page.images.into_iter();
                    let (Some(low), Some(high)) = (renders.next(), renders.next()) else {
                        return Err(LoaderError::Render {
                            page: page.number,
                            message: "rasterizer returned fewer renderings than requested".into(),
                        });
                    };
                    images.numbers.push(page.number);
                    images.low.push(low);
                    images.high.push(high);
                }
                debug!("Rendered {} pages of {}", images.len(), path.display());
                Ok(images)
            }
            DocumentKind::Image => {
                let image = load_image(path)?;
                Ok(PageImages {
                    numbers: vec![1],
                    low: vec![image.clone()],
                    high: vec![image],
                })
            }
        }
    }
}

/// Decodes a raster image file into RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, LoaderError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| LoaderError::Image {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlankPdf {
        page_count: usize,
    }

    impl Rasterizer for BlankPdf {
        fn render(
            &self,
            _path: &Path,
            pages: Option<&PageSet>,
            dpis: &[f32],
        ) -> Result<Vec<RenderedPage>, LoaderError> {
            let indices = resolve_pages(pages, self.page_count)?;
            Ok(indices
                .into_iter()
                .map(|idx| RenderedPage {
                    number: idx + 1,
                    images: dpis
                        .iter()
                        .map(|dpi| RgbImage::new((8.5 * dpi) as u32, (11.0 * dpi) as u32))
                        .collect(),
                })
                .collect())
        }
    }

    #[test]
    fn test_resolve_pages_converts_to_zero_based() {
        let pages: PageSet = "1,3".parse().unwrap();
        assert_eq!(resolve_pages(Some(&pages), 3).unwrap(), vec![0, 2]);
        assert_eq!(resolve_pages(None, 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_resolve_pages_rejects_page_past_end() {
        let pages: PageSet = "2,4".parse().unwrap();
        let err = resolve_pages(Some(&pages), 3).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::PageOutOfRange {
                page: 4,
                page_count: 3
            }
        ));
    }

    #[test]
    fn test_load_pair_for_pdf_keeps_page_numbers() {
        let loader = DocumentLoader::new(Box::new(BlankPdf { page_count: 5 }));
        let pages: PageSet = "2,5".parse().unwrap();
        let images = loader
            .load_pair(Path::new("doc.pdf"), DocumentKind::Pdf, Some(&pages), 10.0, 20.0)
            .unwrap();

        assert_eq!(images.numbers, vec![2, 5]);
        assert_eq!(images.low[0].width(), 85);
        assert_eq!(images.high[0].width(), 170);
        assert_eq!(images.scale_factors(0), (2.0, 2.0));
    }

    #[test]
    fn test_resolve_pages_wide_range_fails_without_expanding() {
        let pages: PageSet = "1-4000000000".parse().unwrap();
        let err = resolve_pages(Some(&pages), 3).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::PageOutOfRange {
                page: 4,
                page_count: 3
            }
        ));

        let loader = DocumentLoader::new(Box::new(BlankPdf { page_count: 3 }));
        assert!(loader
            .load_pair(Path::new("doc.pdf"), DocumentKind::Pdf, Some(&pages), 10.0, 20.0)
            .is_err());
    }

    #[test]
    fn test_load_pair_for_image_ignores_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbImage::new(30, 40).save(&path).unwrap();

        let loader = DocumentLoader::new(Box::new(BlankPdf { page_count: 0 }));
        let pages: PageSet = "7".parse().unwrap();
        let images = loader
            .load_pair(&path, DocumentKind::Image, Some(&pages), 96.0, 192.0)
            .unwrap();

        assert_eq!(images.numbers, vec![1]);
        assert_eq!(images.low[0].dimensions(), (30, 40));
        assert_eq!(images.high[0].dimensions(), (30, 40));
        assert_eq!(images.scale_factors(0), (1.0, 1.0));
    }

    #[test]
    fn test_load_image_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really a png").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, LoaderError::Image { .. }));
    }
}
