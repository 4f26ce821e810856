use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::extract::{DEFAULT_BATCH_SIZE, DEFAULT_MIN_TEXT_CHARS, DEFAULT_SEQUENTIAL_PAGE_LIMIT};
use crate::store::DEFAULT_COMPRESS_THRESHOLD;

#[derive(Parser, Debug)]
#[command(
    name = "folio",
    version,
    about = "Page-aware text extraction and search for scanned and native PDFs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Status(StatusArgs),
    List(ListArgs),
    Search(SearchArgs),
    SearchAll(SearchAllArgs),
    QuickSearch(QuickSearchArgs),
    Text(TextArgs),
    Delete(DeleteArgs),
    Info(InspectArgs),
    Analyze(InspectArgs),
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "FOLIO_DATA_ROOT", default_value = ".cache/folio")]
    pub data_root: PathBuf,

    #[arg(long, env = "FOLIO_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "FOLIO_COMPRESS_THRESHOLD", default_value_t = DEFAULT_COMPRESS_THRESHOLD)]
    pub compress_threshold: usize,
}

impl StoreArgs {
    pub fn texts_dir(&self) -> PathBuf {
        self.data_root.join("texts")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_root.join("queue")
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_root.join("folio.sqlite"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractionArgs {
    #[arg(long, value_enum, env = "FOLIO_OCR_MODE", default_value_t = OcrMode::Auto)]
    pub ocr_mode: OcrMode,

    #[arg(long, env = "FOLIO_OCR_LANG", default_value = "eng")]
    pub ocr_lang: String,

    #[arg(long, env = "FOLIO_OCR_MIN_TEXT_CHARS", default_value_t = DEFAULT_MIN_TEXT_CHARS)]
    pub ocr_min_text_chars: usize,

    #[arg(long, env = "FOLIO_OCR_TIMEOUT_SECS", default_value_t = 60)]
    pub ocr_timeout_secs: u64,

    #[arg(long, env = "FOLIO_TESSERACT_CMD", default_value = "tesseract")]
    pub tesseract_cmd: PathBuf,

    #[arg(long, env = "FOLIO_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long, env = "FOLIO_SEQUENTIAL_PAGE_LIMIT", default_value_t = DEFAULT_SEQUENTIAL_PAGE_LIMIT)]
    pub sequential_page_limit: usize,

    #[arg(long, env = "FOLIO_WORKERS")]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub extraction: ExtractionArgs,

    pub pdf_path: PathBuf,

    #[arg(long, value_enum, default_value_t = ExecutionMode::Auto)]
    pub execution: ExecutionMode,

    #[arg(long, default_value_t = false)]
    pub reprocess: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    pub document_id: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long)]
    pub term: String,

    #[arg(long, default_value_t = false)]
    pub case_sensitive: bool,

    #[arg(long, env = "FOLIO_CONTEXT_CHARS", default_value_t = 100)]
    pub context_chars: usize,

    #[arg(long, default_value_t = false)]
    pub regex: bool,

    #[arg(long, default_value_t = 10.0)]
    pub occurrence_weight: f64,

    #[arg(long, default_value_t = 100.0)]
    pub tightness_weight: f64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub query: QueryArgs,

    pub document_id: String,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SearchAllArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub query: QueryArgs,

    #[arg(long, env = "FOLIO_MAX_DOCUMENTS", default_value_t = 50)]
    pub max_documents: usize,

    #[arg(long, default_value_t = 20)]
    pub max_matches_per_document: usize,

    #[arg(long, env = "FOLIO_WORKERS")]
    pub workers: Option<usize>,
}

/// Extracts and searches a PDF in memory without registering or storing it.
#[derive(Args, Debug, Clone)]
pub struct QuickSearchArgs {
    #[command(flatten)]
    pub extraction: ExtractionArgs,

    #[command(flatten)]
    pub query: QueryArgs,

    pub pdf_path: PathBuf,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    pub document_id: String,

    /// Also delete the source PDF recorded at ingest time.
    #[arg(long, default_value_t = false)]
    pub remove_source: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TextArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    pub document_id: String,

    #[arg(long)]
    pub page: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    pub pdf_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub extraction: ExtractionArgs,

    #[arg(long, default_value_t = false)]
    pub once: bool,

    #[arg(long, default_value_t = 2)]
    pub poll_secs: u64,

    /// Ask the running worker to cancel its current job and exit.
    #[arg(long, default_value_t = false, conflicts_with = "once")]
    pub stop: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrMode {
    Off,
    Auto,
    Sparse,
    Force,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Sparse => "sparse",
            Self::Force => "force",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExecutionMode {
    Auto,
    InProcess,
    Queue,
}
