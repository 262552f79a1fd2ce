//! Input documents and their identifiers.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::constants::ID_SEPARATOR;

/// Flat, path-derived identifier of a document.
///
/// Formed from the path relative to the input root, without the final
/// extension, with path separators replaced by [`ID_SEPARATOR`]. The same
/// file under the same root always maps to the same identifier, which is what
/// keys the checkpoint across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Derives the identifier of `path` relative to `root`.
    ///
    /// A path outside `root` is used as given.
    pub fn from_path(root: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let stem = relative.with_extension("");

        let parts: Vec<String> = stem
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::ParentDir => Some("..".to_string()),
                _ => None,
            })
            .collect();

        Self(parts.join(&ID_SEPARATOR.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for one page in the raw text output, `<id>↳<page>`.
    pub fn page_key(&self, page: usize) -> String {
        format!("{}{}{}", self.0, ID_SEPARATOR, page)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The accepted input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Maps a sniffed extension to a kind; anything else is unsupported.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "pdf" => Some(DocumentKind::Pdf),
            "jpg" | "jpeg" | "png" => Some(DocumentKind::Image),
            _ => None,
        }
    }

    /// Sniffs the file's magic bytes.
    ///
    /// Returns `Ok(None)` when the content is not a PDF, JPEG or PNG,
    /// whatever the file name says.
    pub fn detect(path: &Path) -> std::io::Result<Option<Self>> {
        Ok(infer::get_from_path(path)?.and_then(|kind| Self::from_extension(kind.extension())))
    }
}

/// A document assigned to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub path: PathBuf,
    pub id: DocumentId,
}

impl DocumentJob {
    pub fn new(root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = DocumentId::from_path(root, &path);
        Self { path, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_document_id_from_nested_path() {
        let id = DocumentId::from_path(Path::new("/data/in"), Path::new("/data/in/vol1/book.pdf"));
        assert_eq!(id.as_str(), "vol1↳book");
        assert_eq!(id.page_key(3), "vol1↳book↳3");
    }

    #[test]
    fn test_document_id_is_stable_for_same_root() {
        let root = Path::new("scans");
        let path = Path::new("scans/a/b/page.scan.png");
        let first = DocumentId::from_path(root, path);
        let second = DocumentId::from_path(root, path);
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "a↳b↳page.scan");
    }

    #[test]
    fn test_document_id_keeps_dotted_directories() {
        let id = DocumentId::from_path(Path::new("in"), Path::new("in/v1.2/scan"));
        assert_eq!(id.as_str(), "v1.2↳scan");
    }

    #[test]
    fn test_document_kind_from_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();

        let pdf = dir.path().join("looks_like.png");
        std::fs::File::create(&pdf)
            .unwrap()
            .write_all(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n")
            .unwrap();
        assert_eq!(DocumentKind::detect(&pdf).unwrap(), Some(DocumentKind::Pdf));

        let text = dir.path().join("notes.pdf");
        std::fs::write(&text, "just text").unwrap();
        assert_eq!(DocumentKind::detect(&text).unwrap(), None);

        let png = dir.path().join("page.png");
        image::RgbImage::new(4, 4).save(&png).unwrap();
        assert_eq!(DocumentKind::detect(&png).unwrap(), Some(DocumentKind::Image));
    }
}
