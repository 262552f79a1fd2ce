//! Domain types flowing through the pipeline.
//!
//! Model outputs ([`PageLayout`], [`PageDetection`], [`PageText`],
//! [`TableStructure`]), the merged page structure, and document identity.

pub mod document;
pub mod layout;
pub mod merged;
pub mod table;
pub mod text;

pub use document::{DocumentId, DocumentJob, DocumentKind};
pub use layout::{LayoutBox, PageLayout, RegionKind};
pub use merged::{MergedBox, MergedPage};
pub use table::{RecognizedTable, TableCell, TableCol, TableRow, TableStructure};
pub use text::{DetectionBox, PageDetection, PageText, TextLine, mean_or_zero};
