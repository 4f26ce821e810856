use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use super::output::write_json;
use crate::cli::InspectArgs;
use crate::extract::inspect::{analyze_structure, document_info};
use crate::extract::source::PopplerDocument;

pub fn run_info(args: InspectArgs) -> Result<()> {
    let size_bytes = fs::metadata(&args.pdf_path)
        .with_context(|| format!("failed to stat {}", args.pdf_path.display()))?
        .len();
    let document = PopplerDocument::open(&args.pdf_path)?;
    let report = document_info(&document, size_bytes)?;
    info!(pages = report.pages, has_text = report.has_text, "document inspected");
    write_json(&report)
}

pub fn run_analyze(args: InspectArgs) -> Result<()> {
    let document = PopplerDocument::open(&args.pdf_path)?;
    let analysis = analyze_structure(&document)?;
    info!(
        pages = analysis.total_pages,
        strategy = ?analysis.processing_strategy,
        "structure analyzed"
    );
    write_json(&analysis)
}
