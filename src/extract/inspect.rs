use anyhow::{Context, Result};

use super::source::DocumentSource;
use crate::model::{DocumentInfo, PageSize, ProcessingStrategy, StructureAnalysis};

const INFO_SAMPLE_PAGES: usize = 5;
const SECONDS_PER_PAGE_ESTIMATE: f64 = 0.5;
const TEXT_PAGE_MIN_CHARS: usize = 100;

pub fn document_info(source: &dyn DocumentSource, size_bytes: u64) -> Result<DocumentInfo> {
    let pages = source.page_count();
    let sample = pages.min(INFO_SAMPLE_PAGES);

    let mut has_text = false;
    let mut page_sizes = Vec::with_capacity(sample);
    for page in 1..=sample {
        let text = source
            .native_text(page)
            .with_context(|| format!("failed to sample text of page {page}"))?;
        if !text.trim().is_empty() {
            has_text = true;
        }
        let dimensions = source.page_dimensions(page)?;
        page_sizes.push(PageSize {
            width: dimensions.width.round() as u32,
            height: dimensions.height.round() as u32,
        });
    }

    Ok(DocumentInfo {
        pages,
        size_mb: round2(size_bytes as f64 / (1024.0 * 1024.0)),
        has_text,
        estimated_processing_minutes: round2(pages as f64 * SECONDS_PER_PAGE_ESTIMATE / 60.0),
        page_sizes,
    })
}

/// Samples first, middle and last page to suggest an extraction strategy.
pub fn analyze_structure(source: &dyn DocumentSource) -> Result<StructureAnalysis> {
    let total = source.page_count();
    let samples = if total > 2 {
        vec![1, total / 2 + 1, total]
    } else {
        vec![1]
    };

    let mut text_pages = 0usize;
    for &page in &samples {
        if page > total {
            continue;
        }
        let text = source
            .native_text(page)
            .with_context(|| format!("failed to sample text of page {page}"))?;
        if text.trim().chars().count() > TEXT_PAGE_MIN_CHARS {
            text_pages += 1;
        }
    }

    let mut analysis = if text_pages == samples.len() {
        StructureAnalysis {
            total_pages: total,
            likely_scanned: false,
            recommended_dpi: 150,
            suggested_batch_size: 15,
            processing_strategy: ProcessingStrategy::TextOnly,
        }
    } else if text_pages == 0 {
        StructureAnalysis {
            total_pages: total,
            likely_scanned: true,
            recommended_dpi: 350,
            suggested_batch_size: 8,
            processing_strategy: ProcessingStrategy::OcrOnly,
        }
    } else {
        StructureAnalysis {
            total_pages: total,
            likely_scanned: true,
            recommended_dpi: 300,
            suggested_batch_size: 15,
            processing_strategy: ProcessingStrategy::Hybrid,
        }
    };

    if total > 300 {
        analysis.suggested_batch_size = 20;
    }

    Ok(analysis)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
