//! Flattens merged pages into per-page plain text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

use crate::core::errors::BatchError;
use crate::domain::{DocumentId, MergedPage, TableStructure};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Collapses whitespace runs to one space and trims.
pub fn clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// `<@Table>csv</@Table> `, or nothing for a table without cells.
pub fn table_markup(table: &TableStructure) -> Result<String, BatchError> {
    if table.cells.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("<@Table>{}</@Table> ", table.to_csv()?))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Plain text of a document, one entry per page in page order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawText {
    pub document_id: DocumentId,
    pub pages: Vec<(usize, String)>,
    pub word_count: usize,
}

impl RawText {
    /// Flattens `pages`.
    ///
    /// A table counts the whitespace-split tokens of its whole markup, so
    /// `<@Table>a,b\nc d</@Table> ` is three words.
    pub fn from_merged(document_id: &DocumentId, pages: &[MergedPage]) -> Result<Self, BatchError> {
        let mut total_words = 0;
        let pages = pages
            .iter()
            .map(|page| {
                let mut text = String::new();
                for region in &page.bboxes {
                    if let Some(table) = &region.table_content {
                        let markup = table_markup(&table.structure)?;
                        total_words += word_count(&markup);
                        text.push_str(&markup);
                        text.push('\n');
                    } else {
                        for line in region.text_lines.iter().flatten() {
                            let cleaned = clean_text(&line.text);
                            total_words += word_count(&cleaned);
                            text.push_str(&cleaned);
                            text.push(' ');
                        }
                    }
                }
                Ok((page.page, text))
            })
            .collect::<Result<Vec<_>, BatchError>>()?;

        Ok(Self {
            document_id: document_id.clone(),
            pages,
            word_count: total_words,
        })
    }
}

struct PageTexts<'a>(&'a RawText);

impl Serialize for PageTexts<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = self.0;
        let mut map = serializer.serialize_map(Some(raw.pages.len()))?;
        for (page, text) in &raw.pages {
            map.serialize_entry(&raw.document_id.page_key(*page), text)?;
        }
        map.end()
    }
}

/// `{"pages": {"<id>↳<page>": text, ...}, "word_count": n}`
impl Serialize for RawText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RawText", 2)?;
        state.serialize_field("pages", &PageTexts(self))?;
        state.serialize_field("word_count", &self.word_count)?;
        state.end()
    }
}
