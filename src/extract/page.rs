use anyhow::Result;
use tracing::{debug, warn};

use super::ExtractOptions;
use super::ocr::OcrCapability;
use super::source::{DocumentSource, PageDimensions};
use crate::assemble::ERROR_PAGE_PLACEHOLDER;
use crate::cli::OcrMode;
use crate::model::{PageBackend, PageProvenance, PageText};
use crate::util::non_whitespace_char_count;

pub const SMALL_PAGE_DPI: u32 = 400;
pub const LARGE_PAGE_DPI: u32 = 300;
const SMALL_PAGE_LONGEST_SIDE: f64 = 1000.0;

pub fn select_dpi(dimensions: PageDimensions) -> u32 {
    if dimensions.longest_side() < SMALL_PAGE_LONGEST_SIDE {
        SMALL_PAGE_DPI
    } else {
        LARGE_PAGE_DPI
    }
}

pub fn needs_ocr(native_text: &str, mode: OcrMode, min_text_chars: usize) -> bool {
    let trimmed = native_text.trim();
    match mode {
        OcrMode::Off => false,
        OcrMode::Auto => trimmed.is_empty(),
        OcrMode::Sparse => trimmed.chars().count() < min_text_chars,
        OcrMode::Force => true,
    }
}

pub fn extract_page(
    source: &dyn DocumentSource,
    ocr: Option<&OcrCapability>,
    page: usize,
    options: &ExtractOptions,
) -> Result<PageText> {
    let native = source.native_text(page)?;
    let native_chars = non_whitespace_char_count(&native);

    let ocr = match ocr {
        Some(ocr) if needs_ocr(&native, options.ocr_mode, options.min_text_chars) => ocr,
        _ => {
            let reason = if native_chars == 0 {
                "text_layer_empty"
            } else {
                "text_layer_default"
            };
            return Ok(text_layer_page(page, native, reason, None));
        }
    };

    let dpi = match source.page_dimensions(page) {
        Ok(dimensions) => select_dpi(dimensions),
        Err(error) => {
            debug!(page, error = %error, "page size unknown, using default OCR resolution");
            LARGE_PAGE_DPI
        }
    };

    let image = match source.render_page(page, dpi) {
        Ok(image) => image,
        Err(error) => {
            warn!(page, dpi, error = %format!("{error:#}"), "rasterization failed, keeping text layer");
            let mut fallback = text_layer_page(page, native, "ocr_render_failed_text_layer_fallback", None);
            fallback.provenance.dpi = Some(dpi);
            return Ok(fallback);
        }
    };

    let recognized = ocr.recognize(image, &options.language, page);
    let ocr_chars = non_whitespace_char_count(&recognized);

    if ocr_chars == 0 {
        let mut fallback = text_layer_page(page, native, "ocr_empty_text_layer_fallback", Some(0));
        fallback.provenance.dpi = Some(dpi);
        return Ok(fallback);
    }

    let reason = match options.ocr_mode {
        OcrMode::Force => "ocr_force_mode",
        OcrMode::Sparse => "ocr_sparse_text_layer",
        _ => "ocr_empty_text_layer",
    };

    Ok(PageText {
        number: page,
        text: recognized,
        used_ocr: true,
        provenance: PageProvenance {
            page,
            backend: PageBackend::Ocr,
            reason: reason.to_string(),
            text_char_count: ocr_chars,
            ocr_char_count: Some(ocr_chars),
            dpi: Some(dpi),
        },
    })
}

pub fn placeholder_page(page: usize) -> PageText {
    PageText {
        number: page,
        text: ERROR_PAGE_PLACEHOLDER.to_string(),
        used_ocr: false,
        provenance: PageProvenance {
            page,
            backend: PageBackend::Error,
            reason: "extraction_failed".to_string(),
            text_char_count: 0,
            ocr_char_count: None,
            dpi: None,
        },
    }
}

fn text_layer_page(
    page: usize,
    text: String,
    reason: &str,
    ocr_char_count: Option<usize>,
) -> PageText {
    PageText {
        number: page,
        provenance: PageProvenance {
            page,
            backend: PageBackend::TextLayer,
            reason: reason.to_string(),
            text_char_count: non_whitespace_char_count(&text),
            ocr_char_count,
            dpi: None,
        },
        text,
        used_ocr: false,
    }
}
