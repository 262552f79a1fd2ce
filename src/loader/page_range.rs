//! Page range expressions such as `"1,3,5-9"`.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a page range expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageRangeError {
    #[error("empty page range")]
    Empty,
    #[error("invalid page number '{0}'")]
    InvalidNumber(String),
    #[error("page numbers are 1-based, got 0")]
    ZeroPage,
    #[error("range '{start}-{end}' runs backwards")]
    Reversed { start: u32, end: u32 },
}

/// A sorted set of unique 1-based page numbers.
///
/// Stored as disjoint inclusive ranges, so `1-4000000000` costs one entry
/// until it is resolved against a real page count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageSet(Vec<(u32, u32)>);

impl PageSet {
    pub fn new(pages: impl IntoIterator<Item = u32>) -> Self {
        Self::from_ranges(pages.into_iter().map(|page| (page, page)).collect())
    }

    /// Sorts `ranges` and merges overlapping or adjacent ones.
    fn from_ranges(mut ranges: Vec<(u32, u32)>) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        Self(merged)
    }

    /// Every page in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().flat_map(|&(start, end)| start..=end)
    }

    pub fn len(&self) -> usize {
        self.0
            .iter()
            .map(|&(start, end)| (end - start) as usize + 1)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, page: u32) -> bool {
        self.0.iter().any(|&(start, end)| (start..=end).contains(&page))
    }

    /// Largest page number in the set.
    pub fn last(&self) -> Option<u32> {
        self.0.last().map(|&(_, end)| end)
    }

    /// Smallest page past `page_count`, if any.
    pub fn first_beyond(&self, page_count: usize) -> Option<u32> {
        self.0
            .iter()
            .find(|&&(_, end)| end as usize > page_count)
            .map(|&(start, _)| {
                let next = u32::try_from(page_count.saturating_add(1)).unwrap_or(u32::MAX);
                start.max(next)
            })
    }
}

fn parse_page(token: &str) -> Result<u32, PageRangeError> {
    let page = token
        .trim()
        .parse::<u32>()
        .map_err(|_| PageRangeError::InvalidNumber(token.trim().to_string()))?;
    if page == 0 {
        return Err(PageRangeError::ZeroPage);
    }
    Ok(page)
}

impl FromStr for PageSet {
    type Err = PageRangeError;

    /// Parses comma-separated page numbers and inclusive `a-b` ranges.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse_page(start)?, parse_page(end)?);
                    if start > end {
                        return Err(PageRangeError::Reversed { start, end });
                    }
                    ranges.push((start, end));
                }
                None => {
                    let page = parse_page(part)?;
                    ranges.push((page, page));
                }
            }
        }

        if ranges.is_empty() {
            return Err(PageRangeError::Empty);
        }
        Ok(Self::from_ranges(ranges))
    }
}

impl TryFrom<String> for PageSet {
    type Error = PageRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageSet> for String {
    fn from(pages: PageSet) -> Self {
        pages.to_string()
    }
}

impl fmt::Display for PageSet {
    /// Compact form, one entry per run of consecutive pages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.0.iter().map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        });
        write!(f, "{}", parts.format(","))
    }
}
