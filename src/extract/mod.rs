use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cli::OcrMode;
use crate::model::{ExtractionSummary, PageBackend, PageText};

pub mod inspect;
pub mod ocr;
pub mod page;
pub mod source;

use ocr::OcrCapability;
use page::{extract_page, placeholder_page};
use source::DocumentSource;

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_SEQUENTIAL_PAGE_LIMIT: usize = 100;
pub const DEFAULT_MIN_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub ocr_mode: OcrMode,
    pub language: String,
    pub min_text_chars: usize,
    pub batch_size: usize,
    pub sequential_page_limit: usize,
    pub workers: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            ocr_mode: OcrMode::Auto,
            language: "eng".to_string(),
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
            batch_size: DEFAULT_BATCH_SIZE,
            sequential_page_limit: DEFAULT_SEQUENTIAL_PAGE_LIMIT,
            workers: crate::util::default_worker_count(),
        }
    }
}

/// Cooperative stop signal: no new pages start once set, pages already
/// running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub pages: Vec<PageText>,
    pub used_ocr: bool,
    pub ocr_page_count: usize,
    pub failed_page_count: usize,
    pub empty_page_count: usize,
    pub warnings: Vec<String>,
}

impl ExtractionOutcome {
    fn from_pages(pages: Vec<PageText>) -> Self {
        let ocr_page_count = pages.iter().filter(|page| page.used_ocr).count();
        let failed_page_count = pages
            .iter()
            .filter(|page| page.provenance.backend == PageBackend::Error)
            .count();
        let empty_page_count = pages
            .iter()
            .filter(|page| page.text.trim().is_empty())
            .count();
        let warnings = pages.iter().filter_map(page_warning).collect();
        Self {
            used_ocr: ocr_page_count > 0,
            ocr_page_count,
            failed_page_count,
            empty_page_count,
            warnings,
            pages,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            ocr_page_count: self.ocr_page_count,
            failed_page_count: self.failed_page_count,
            empty_page_count: self.empty_page_count,
            warnings: self.warnings.clone(),
            pages: self.pages.iter().map(|page| page.provenance.clone()).collect(),
        }
    }
}

fn page_warning(page: &PageText) -> Option<String> {
    let provenance = &page.provenance;
    let detail = match provenance.reason.as_str() {
        "extraction_failed" => "extraction failed; placeholder text recorded",
        "ocr_render_failed_text_layer_fallback" => "page could not be rendered for OCR; kept text layer",
        "ocr_empty_text_layer_fallback" => "OCR produced no text; kept text layer",
        _ => return None,
    };
    Some(format!("page {}: {detail}", provenance.page))
}

pub fn extract_document(
    source: &dyn DocumentSource,
    ocr: Option<&OcrCapability>,
    options: &ExtractOptions,
    cancel: &CancelFlag,
) -> Result<ExtractionOutcome> {
    let total_pages = source.page_count();
    info!(
        pages = total_pages,
        ocr_mode = options.ocr_mode.as_str(),
        language = %options.language,
        ocr_engine = ocr.map(|capability| capability.engine_name()).unwrap_or("none"),
        "starting extraction"
    );

    let pages = if total_pages > options.sequential_page_limit {
        extract_in_batches(source, ocr, options, cancel, total_pages)?
    } else {
        extract_sequentially(source, ocr, options, cancel, total_pages)?
    };

    let mut outcome = ExtractionOutcome::from_pages(pages);
    if ocr.is_none() && options.ocr_mode != OcrMode::Off {
        outcome.warnings.insert(
            0,
            format!(
                "OCR mode {} requested but no OCR engine is available; used the text layer only",
                options.ocr_mode.as_str()
            ),
        );
    }
    info!(
        pages = outcome.page_count(),
        ocr_pages = outcome.ocr_page_count,
        failed_pages = outcome.failed_page_count,
        empty_pages = outcome.empty_page_count,
        warnings = outcome.warnings.len(),
        "extraction finished"
    );
    Ok(outcome)
}

fn extract_sequentially(
    source: &dyn DocumentSource,
    ocr: Option<&OcrCapability>,
    options: &ExtractOptions,
    cancel: &CancelFlag,
    total_pages: usize,
) -> Result<Vec<PageText>> {
    let mut pages = Vec::with_capacity(total_pages);
    for page in 1..=total_pages {
        if cancel.is_cancelled() {
            bail!("extraction cancelled at page {page} of {total_pages}");
        }
        pages.push(extract_or_placeholder(source, ocr, page, options));

        if page % 10 == 0 {
            info!(done = page, total = total_pages, "pages processed");
        }
    }
    Ok(pages)
}

fn extract_in_batches(
    source: &dyn DocumentSource,
    ocr: Option<&OcrCapability>,
    options: &ExtractOptions,
    cancel: &CancelFlag,
    total_pages: usize,
) -> Result<Vec<PageText>> {
    let batch_size = options.batch_size.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|index| format!("extract-{index}"))
        .build()
        .context("failed to build extraction pool")?;

    let mut slots: Vec<Option<PageText>> = vec![None; total_pages];
    let ordinals = (1..=total_pages).collect::<Vec<_>>();

    for batch in ordinals.chunks(batch_size) {
        let (first, last) = (batch[0], batch[batch.len() - 1]);
        if cancel.is_cancelled() {
            bail!("extraction cancelled before pages {first}-{last} of {total_pages}");
        }
        info!(first, last, total = total_pages, "processing page batch");

        let finished = pool.install(|| {
            batch
                .par_iter()
                .filter_map(|&page| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(extract_or_placeholder(source, ocr, page, options))
                })
                .collect::<Vec<_>>()
        });

        let finished_count = finished.len();
        for page in finished {
            if let Some(slot) = page.number.checked_sub(1).and_then(|index| slots.get_mut(index)) {
                *slot = Some(page);
            }
        }

        if finished_count < batch.len() {
            bail!(
                "extraction cancelled during pages {first}-{last} of {total_pages} ({finished_count} finished)"
            );
        }
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.unwrap_or_else(|| placeholder_page(index + 1)))
        .collect())
}

fn extract_or_placeholder(
    source: &dyn DocumentSource,
    ocr: Option<&OcrCapability>,
    page: usize,
    options: &ExtractOptions,
) -> PageText {
    match catch_unwind(AssertUnwindSafe(|| extract_page(source, ocr, page, options))) {
        Ok(Ok(extracted)) => extracted,
        Ok(Err(error)) => {
            warn!(page, error = %format!("{error:#}"), "page extraction failed, recording placeholder");
            placeholder_page(page)
        }
        Err(_) => {
            warn!(page, "page extraction panicked, recording placeholder");
            placeholder_page(page)
        }
    }
}
