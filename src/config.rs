use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cli::{ExtractionArgs, OcrMode, QueryArgs, SearchAllArgs, StoreArgs};
use crate::extract::ExtractOptions;
use crate::extract::ocr::{OcrCapability, TesseractEngine};
use crate::search::corpus::CorpusOptions;
use crate::search::{ScoreWeights, SearchQuery};
use crate::store::TextStore;
use crate::util::default_worker_count;

pub fn text_store(args: &StoreArgs) -> TextStore {
    TextStore::new(args.texts_dir(), args.compress_threshold)
}

pub fn extract_options(args: &ExtractionArgs) -> ExtractOptions {
    ExtractOptions {
        ocr_mode: args.ocr_mode,
        language: args.ocr_lang.clone(),
        min_text_chars: args.ocr_min_text_chars,
        batch_size: args.batch_size.max(1),
        sequential_page_limit: args.sequential_page_limit,
        workers: args.workers.unwrap_or_else(default_worker_count).max(1),
    }
}

pub fn ocr_capability(args: &ExtractionArgs) -> Option<OcrCapability> {
    if args.ocr_mode == OcrMode::Off {
        return None;
    }

    let engine = TesseractEngine::new(&args.tesseract_cmd);
    if !engine.is_available() {
        warn!(
            command = %args.tesseract_cmd.display(),
            "OCR requested but tesseract is unavailable; continuing with text layer only"
        );
        return None;
    }
    engine.verify_language(&args.ocr_lang);

    let timeout = (args.ocr_timeout_secs > 0).then(|| Duration::from_secs(args.ocr_timeout_secs));
    Some(OcrCapability::new(Arc::new(engine), timeout))
}

pub fn search_query(args: &QueryArgs) -> SearchQuery {
    SearchQuery {
        case_sensitive: args.case_sensitive,
        context_chars: args.context_chars,
        use_regex: args.regex,
        ..SearchQuery::literal(&args.term)
    }
}

pub fn score_weights(args: &QueryArgs) -> ScoreWeights {
    ScoreWeights {
        occurrence: args.occurrence_weight,
        tightness: args.tightness_weight,
        ..ScoreWeights::default()
    }
}

pub fn corpus_options(args: &SearchAllArgs) -> CorpusOptions {
    CorpusOptions {
        max_documents: args.max_documents,
        max_matches_per_document: args.max_matches_per_document,
        workers: args.workers.unwrap_or_else(default_worker_count).max(1),
        weights: score_weights(&args.query),
    }
}
