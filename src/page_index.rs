use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStart {
    pub page: usize,
    pub offset: usize,
}

/// Offset-to-page table built from the `--- Page N ---` markers of an
/// assembled text. Offsets are UTF-8 byte offsets into that text.
///
/// Only a marker on a line of its own counts, and after the first one only
/// the next consecutive page number is accepted. Marker-like text inside a
/// page body therefore cannot split or renumber pages.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    starts: Vec<PageStart>,
}

impl PageIndex {
    pub fn build(text: &str) -> Result<Self> {
        let pattern =
            Regex::new(r"(?m)^--- Page (\d+) ---$").context("failed to compile page marker regex")?;

        let mut starts = Vec::<PageStart>::new();
        for captures in pattern.captures_iter(text) {
            let (Some(whole), Some(number)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let Ok(page) = number.as_str().parse::<usize>() else {
                debug!(marker = whole.as_str(), "skipping unparsable page marker");
                continue;
            };

            let expected = starts.last().map(|last| last.page + 1);
            if expected.is_some_and(|expected| expected != page) {
                debug!(
                    page,
                    expected,
                    offset = whole.start(),
                    "skipping non-consecutive page marker"
                );
                continue;
            }

            starts.push(PageStart {
                page,
                offset: whole.start(),
            });
        }

        Ok(Self { starts })
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.starts.len()
    }

    /// Page owning `offset`: the last marker starting at or before it, or the
    /// first page when the offset precedes every marker.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        let first = self.starts.first()?;
        let idx = self.starts.partition_point(|start| start.offset <= offset);
        if idx == 0 {
            return Some(first.page);
        }
        Some(self.starts[idx - 1].page)
    }

    pub fn page_span(&self, page: usize, text_len: usize) -> Option<(usize, usize)> {
        let idx = self
            .starts
            .binary_search_by(|start| start.page.cmp(&page))
            .ok()?;
        let begin = self.starts[idx].offset;
        let end = self
            .starts
            .get(idx + 1)
            .map(|next| next.offset)
            .unwrap_or(text_len);
        Some((begin, end))
    }
}
