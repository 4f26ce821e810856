use std::io::{self, Write};

use anyhow::{Result, bail};
use tracing::info;

use super::output::{write_json, write_match};
use crate::cli::{QuickSearchArgs, SearchAllArgs, SearchArgs, StoreArgs};
use crate::config::{
    corpus_options, extract_options, ocr_capability, score_weights, search_query, text_store,
};
use crate::extract::source::PopplerDocument;
use crate::identity::document_id_for_path;
use crate::model::SearchResponse;
use crate::pipeline::search_unstored;
use crate::repository::DocumentRepository;
use crate::search::LoadedDocument;
use crate::search::corpus::{attach_filenames, search_corpus};
use crate::store::{TextArtifact, TextStore};

pub fn run_single(args: SearchArgs) -> Result<()> {
    let store = text_store(&args.store);
    let artifact = locate_text(&args.store, &store, &args.document_id)?;
    let document = LoadedDocument::new(&args.document_id, store.read(&artifact.path)?)?;

    let query = search_query(&args.query);
    let mut response = document.search(&query, score_weights(&args.query))?;
    response.results.truncate(args.limit);
    info!(
        doc_id = %args.document_id,
        total_matches = response.total_matches,
        returned = response.results.len(),
        elapsed_ms = response.execution_time_ms,
        "search completed"
    );

    if args.query.json {
        return write_json(&response);
    }
    write_response(&response)
}

pub fn run_quick(args: QuickSearchArgs) -> Result<()> {
    let document_id = document_id_for_path(&args.pdf_path)?;
    let source = PopplerDocument::open(&args.pdf_path)?;
    let ocr = ocr_capability(&args.extraction);

    let mut response = search_unstored(
        &source,
        &document_id,
        ocr.as_ref(),
        &extract_options(&args.extraction),
        &search_query(&args.query),
        score_weights(&args.query),
    )?;
    response.results.truncate(args.limit);
    info!(
        doc_id = %document_id,
        total_matches = response.total_matches,
        returned = response.results.len(),
        elapsed_ms = response.execution_time_ms,
        "quick search completed"
    );

    if args.query.json {
        return write_json(&response);
    }
    write_response(&response)
}

fn write_response(response: &SearchResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Document: {}", response.document_id)?;
    writeln!(output, "Term: {}", response.term)?;
    writeln!(
        output,
        "Matches: {} (showing {}) in {:.3} ms",
        response.total_matches,
        response.results.len(),
        response.execution_time_ms
    )?;
    for (rank, found) in response.results.iter().enumerate() {
        write_match(&mut output, rank + 1, found)?;
    }
    output.flush()?;
    Ok(())
}

pub fn run_all(args: SearchAllArgs) -> Result<()> {
    let store = text_store(&args.store);
    let mut response = search_corpus(&store, &search_query(&args.query), &corpus_options(&args))?;

    let db_path = args.store.resolved_db_path();
    if db_path.exists() {
        let filenames = DocumentRepository::open(&db_path)?.filenames()?;
        attach_filenames(&mut response.results, &filenames);
    }

    if args.query.json {
        return write_json(&response);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Term: {}", response.term)?;
    writeln!(
        output,
        "Documents: considered={} matched={} skipped={} in {:.3} ms",
        response.documents_considered,
        response.documents_matched,
        response.skipped.len(),
        response.execution_time_ms
    )?;
    for (rank, result) in response.results.iter().enumerate() {
        writeln!(
            output,
            "{}.\t{}\t{}\ttotal_score={:.3}\tmatches={}",
            rank + 1,
            result.document_id,
            result.filename.as_deref().unwrap_or("-"),
            result.total_score,
            result.match_count
        )?;
        for (match_rank, found) in result.matches.iter().enumerate() {
            write_match(&mut output, match_rank + 1, found)?;
        }
    }
    for skipped in &response.skipped {
        writeln!(output, "skipped\t{}\t{}", skipped.text_path, skipped.reason)?;
    }
    output.flush()?;
    Ok(())
}

/// Finds the stored text for a document, explaining why when there is none.
pub fn locate_text(args: &StoreArgs, store: &TextStore, document_id: &str) -> Result<TextArtifact> {
    if let Some(artifact) = store.locate(document_id)? {
        return Ok(artifact);
    }

    let db_path = args.resolved_db_path();
    if db_path.exists() {
        let repository = DocumentRepository::open(&db_path)?;
        if let Some(record) = repository.get(document_id)? {
            bail!(
                "document {document_id} has no stored text (status: {})",
                record.status
            );
        }
    }
    bail!("unknown document: {document_id}")
}
