use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn progress(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 50,
            Self::Completed | Self::Failed => 100,
        }
    }

    pub const ALL: [DocumentStatus; 4] =
        [Self::Pending, Self::Processing, Self::Completed, Self::Failed];
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => bail!("unknown document status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub source_path: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub task_id: Option<String>,
    pub page_count: Option<usize>,
    pub used_ocr: Option<bool>,
    pub text_path: Option<String>,
    pub text_length: Option<usize>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub compressed: Option<bool>,
}

impl DocumentRecord {
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub page_count: usize,
    pub used_ocr: bool,
    pub text_path: String,
    pub text_length: usize,
    pub compressed: bool,
    pub extraction: Option<ExtractionSummary>,
}

/// Per-document extraction report kept alongside the registry row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub ocr_page_count: usize,
    pub failed_page_count: usize,
    pub empty_page_count: usize,
    pub warnings: Vec<String>,
    pub pages: Vec<PageProvenance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub document_id: String,
    pub task_id: Option<String>,
    pub status: DocumentStatus,
    pub progress: u8,
    pub result: Option<CompletionPayload>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageBackend {
    TextLayer,
    Ocr,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProvenance {
    pub page: usize,
    pub backend: PageBackend,
    pub reason: String,
    pub text_char_count: usize,
    pub ocr_char_count: Option<usize>,
    pub dpi: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: usize,
    pub text: String,
    pub used_ocr: bool,
    pub provenance: PageProvenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub page: usize,
    pub position: usize,
    pub context: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub document_id: String,
    pub term: String,
    pub total_matches: usize,
    pub results: Vec<SearchMatch>,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusResult {
    pub document_id: String,
    pub filename: Option<String>,
    pub text_path: String,
    pub total_score: f64,
    pub match_count: usize,
    pub matches: Vec<SearchMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub text_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusResponse {
    pub term: String,
    pub documents_considered: usize,
    pub documents_matched: usize,
    pub results: Vec<CorpusResult>,
    pub skipped: Vec<SkippedDocument>,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub pages: usize,
    pub size_mb: f64,
    pub has_text: bool,
    pub estimated_processing_minutes: f64,
    pub page_sizes: Vec<PageSize>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    TextOnly,
    OcrOnly,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureAnalysis {
    pub total_pages: usize,
    pub likely_scanned: bool,
    pub recommended_dpi: u32,
    pub suggested_batch_size: usize,
    pub processing_strategy: ProcessingStrategy,
}
