use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assemble::assemble_pages;
use crate::extract::ocr::OcrCapability;
use crate::extract::source::{DocumentSource, PopplerDocument};
use crate::extract::{CancelFlag, ExtractOptions, extract_document};
use crate::model::{CompletionPayload, DocumentStatus, SearchResponse};
use crate::repository::DocumentRepository;
use crate::search::{LoadedDocument, ScoreWeights, SearchQuery};
use crate::store::TextStore;

/// Unit of work handed to an execution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub task_id: String,
    pub document_id: String,
    pub source_path: PathBuf,
}

pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSource>>;
}

pub struct PopplerOpener;

impl SourceOpener for PopplerOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSource>> {
        Ok(Box::new(PopplerDocument::open(path)?))
    }
}

/// Owns a document's lifecycle from `processing` to `completed` or `failed`.
pub struct Pipeline {
    repository: Arc<DocumentRepository>,
    store: TextStore,
    opener: Arc<dyn SourceOpener>,
    ocr: Option<OcrCapability>,
    options: ExtractOptions,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(
        repository: Arc<DocumentRepository>,
        store: TextStore,
        opener: Arc<dyn SourceOpener>,
        ocr: Option<OcrCapability>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            repository,
            store,
            opener,
            ocr,
            options,
            cancel: CancelFlag::default(),
        }
    }

    #[cfg(test)]
    pub fn repository(&self) -> &Arc<DocumentRepository> {
        &self.repository
    }

    /// Setting the returned flag stops the extraction in flight; the document
    /// it belongs to is recorded as failed.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Runs one job to a terminal state. Document-level failures are recorded
    /// in the registry; `Err` means the registry itself could not be updated.
    pub fn process(&self, job: &ProcessingJob) -> Result<DocumentStatus> {
        let started = Instant::now();
        self.repository.mark_processing(&job.document_id)?;
        info!(doc_id = %job.document_id, task_id = %job.task_id, "processing document");

        match self.extract_and_store(job) {
            Ok(payload) => {
                self.repository.mark_completed(&job.document_id, &payload)?;
                info!(
                    doc_id = %job.document_id,
                    pages = payload.page_count,
                    used_ocr = payload.used_ocr,
                    text_length = payload.text_length,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "document completed"
                );
                Ok(DocumentStatus::Completed)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(doc_id = %job.document_id, error = %message, "document failed");
                self.repository.mark_failed(&job.document_id, &message)?;
                Ok(DocumentStatus::Failed)
            }
        }
    }

    fn extract_and_store(&self, job: &ProcessingJob) -> Result<CompletionPayload> {
        let source = self
            .opener
            .open(&job.source_path)
            .with_context(|| format!("failed to open {}", job.source_path.display()))?;

        let outcome = extract_document(source.as_ref(), self.ocr.as_ref(), &self.options, &self.cancel)
            .with_context(|| format!("failed to extract document {}", job.document_id))?;
        if outcome.failed_page_count > 0 {
            warn!(
                doc_id = %job.document_id,
                failed_pages = outcome.failed_page_count,
                "document contains placeholder pages"
            );
        }
        for warning in &outcome.warnings {
            warn!(doc_id = %job.document_id, warning = %warning, "extraction warning");
        }

        let text = assemble_pages(&outcome.pages);
        let artifact = self.store.write(&job.document_id, &text)?;

        Ok(CompletionPayload {
            page_count: outcome.page_count(),
            used_ocr: outcome.used_ocr,
            text_path: artifact.path.display().to_string(),
            text_length: text.len(),
            compressed: artifact.compressed,
            extraction: Some(outcome.summary()),
        })
    }
}

/// Extracts `source` and searches the assembled text in memory. Nothing is
/// registered or written to the text store; the reported time covers both
/// steps.
pub fn search_unstored(
    source: &dyn DocumentSource,
    document_id: &str,
    ocr: Option<&OcrCapability>,
    options: &ExtractOptions,
    query: &SearchQuery,
    weights: ScoreWeights,
) -> Result<SearchResponse> {
    let started = Instant::now();
    let outcome = extract_document(source, ocr, options, &CancelFlag::default())
        .with_context(|| format!("failed to extract document {document_id}"))?;
    let document = LoadedDocument::new(document_id, assemble_pages(&outcome.pages))?;

    let mut response = document.search(query, weights)?;
    response.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::extract::source::{PageDimensions, Rasterizer};
    use crate::page_index::PageIndex;
    use crate::repository::{NewDocument, StatusProvider};
    use crate::store::read_text;

    struct MemorySource {
        pages: Vec<String>,
    }

    impl Rasterizer for MemorySource {
        fn render_page(&self, _page: usize, _dpi: u32) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    impl DocumentSource for MemorySource {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn native_text(&self, page: usize) -> Result<String> {
            Ok(self.pages[page - 1].clone())
        }

        fn page_dimensions(&self, _page: usize) -> Result<PageDimensions> {
            Ok(PageDimensions {
                width: 612.0,
                height: 792.0,
            })
        }
    }

    struct MemoryOpener {
        pages: Vec<&'static str>,
    }

    impl SourceOpener for MemoryOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn DocumentSource>> {
            if path.ends_with("missing.pdf") {
                bail!("document not found: {}", path.display());
            }
            Ok(Box::new(MemorySource {
                pages: self.pages.iter().map(|page| page.to_string()).collect(),
            }))
        }
    }

    fn pipeline(dir: &Path, pages: Vec<&'static str>) -> Pipeline {
        compressing_pipeline(dir, pages, 1024)
    }

    fn compressing_pipeline(dir: &Path, pages: Vec<&'static str>, threshold: usize) -> Pipeline {
        let repository = Arc::new(DocumentRepository::open_in_memory().unwrap());
        let options = ExtractOptions {
            workers: 2,
            ..ExtractOptions::default()
        };
        Pipeline::new(
            repository,
            TextStore::new(dir.join("texts"), threshold),
            Arc::new(MemoryOpener { pages }),
            None,
            options,
        )
    }

    fn job(pipeline: &Pipeline, id: &str, source: &str) -> ProcessingJob {
        pipeline
            .repository()
            .register(&NewDocument {
                id: id.to_string(),
                filename: source.to_string(),
                source_path: source.to_string(),
                size_bytes: 10,
            })
            .unwrap();
        ProcessingJob {
            task_id: format!("task-{id}"),
            document_id: id.to_string(),
            source_path: PathBuf::from(source),
        }
    }

    #[test]
    fn completed_document_is_stored_and_searchable_by_page() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec!["Hello world", "", "world again"]);
        let job = job(&pipeline, "doc_a", "/uploads/a.pdf");

        assert_eq!(pipeline.process(&job).unwrap(), DocumentStatus::Completed);

        let status = pipeline.repository().task_status("doc_a").unwrap().unwrap();
        let result = status.result.unwrap();
        assert_eq!(result.page_count, 3);
        assert!(!result.used_ocr);

        let text = read_text(Path::new(&result.text_path)).unwrap();
        assert_eq!(result.text_length, text.len());
        assert!(!result.compressed);

        let extraction = result.extraction.unwrap();
        assert_eq!(extraction.pages.len(), 3);
        assert_eq!(extraction.pages[1].reason, "text_layer_empty");
        assert_eq!(extraction.empty_page_count, 1);
        assert!(extraction.warnings[0].contains("no OCR engine"));
        let index = PageIndex::build(&text).unwrap();
        assert_eq!(index.page_count(), 3);
        let again = text.find("again").unwrap();
        assert_eq!(index.page_for_offset(again), Some(3));
    }

    #[test]
    fn compressed_artifact_is_reported_in_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = compressing_pipeline(dir.path(), vec!["a page long enough to compress"], 8);
        let job = job(&pipeline, "doc_z", "/uploads/z.pdf");

        assert_eq!(pipeline.process(&job).unwrap(), DocumentStatus::Completed);
        let result = pipeline.repository().task_status("doc_z").unwrap().unwrap().result.unwrap();
        assert!(result.compressed);
        assert!(result.text_path.ends_with(".txt.gz"));
        assert!(read_text(Path::new(&result.text_path)).unwrap().contains("long enough"));
    }

    #[test]
    fn unopenable_document_fails_with_zero_pages() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec!["never read"]);
        let job = job(&pipeline, "doc_b", "/uploads/missing.pdf");

        assert_eq!(pipeline.process(&job).unwrap(), DocumentStatus::Failed);

        let record = pipeline.repository().get("doc_b").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.page_count, Some(0));
        assert!(record.error.unwrap().contains("document not found"));
        assert!(pipeline.store.locate("doc_b").unwrap().is_none());
    }

    #[test]
    fn cancelled_pipeline_marks_document_failed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec!["one", "two"]);
        let job = job(&pipeline, "doc_c", "/uploads/c.pdf");
        pipeline.cancel_flag().cancel();

        assert_eq!(pipeline.process(&job).unwrap(), DocumentStatus::Failed);
        let record = pipeline.repository().get("doc_c").unwrap().unwrap();
        assert!(record.error.unwrap().contains("cancelled"));
    }

    #[test]
    fn unstored_search_finds_matches_by_page() {
        let source = MemorySource {
            pages: vec!["intro".to_string(), "the needle is here".to_string()],
        };

        let response = search_unstored(
            &source,
            "quick_0123456789abcdef",
            None,
            &ExtractOptions::default(),
            &SearchQuery::literal("needle"),
            ScoreWeights::default(),
        )
        .unwrap();

        assert_eq!(response.document_id, "quick_0123456789abcdef");
        assert_eq!(response.total_matches, 1);
        assert_eq!(response.results[0].page, 2);
    }

    #[test]
    fn unregistered_job_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec!["one"]);
        let job = ProcessingJob {
            task_id: "task-x".to_string(),
            document_id: "ghost".to_string(),
            source_path: PathBuf::from("/uploads/ghost.pdf"),
        };
        assert!(pipeline.process(&job).is_err());
    }
}
