use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::info;

use super::output::{write_json, write_task_status};
use crate::cli::IngestArgs;
use crate::config::{extract_options, ocr_capability, text_store};
use crate::identity::document_id_for_path;
use crate::model::{DocumentStatus, TaskStatus};
use crate::pipeline::{Pipeline, PopplerOpener, ProcessingJob};
use crate::repository::{DocumentRepository, NewDocument, Registration, StatusProvider};
use crate::tasks::{new_task_id, select_strategy};

#[derive(Debug, Serialize)]
struct IngestReport {
    document_id: String,
    filename: String,
    duplicate: bool,
    strategy: Option<&'static str>,
    status: TaskStatus,
}

pub fn run(args: IngestArgs) -> Result<()> {
    let pdf_path = &args.pdf_path;
    let metadata = fs::metadata(pdf_path)
        .with_context(|| format!("failed to stat {}", pdf_path.display()))?;
    if !metadata.is_file() {
        bail!("not a file: {}", pdf_path.display());
    }
    let is_pdf = pdf_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        bail!("only PDF documents are supported: {}", pdf_path.display());
    }

    let source_path = fs::canonicalize(pdf_path)
        .with_context(|| format!("failed to resolve {}", pdf_path.display()))?;
    let filename = source_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("invalid UTF-8 filename: {}", source_path.display()))?;
    let document_id = document_id_for_path(&source_path)?;

    let repository = Arc::new(DocumentRepository::open(&args.store.resolved_db_path())?);
    let registration = repository.register(&NewDocument {
        id: document_id.clone(),
        filename: filename.clone(),
        source_path: source_path.display().to_string(),
        size_bytes: metadata.len(),
    })?;

    // A duplicate may be registered under the id of an earlier filename.
    let document_id = registration.record().id.clone();
    let duplicate = matches!(registration, Registration::Existing(_));
    if duplicate && !args.reprocess {
        info!(
            doc_id = %document_id,
            status = %registration.record().status,
            "document already ingested; pass --reprocess to extract again"
        );
        return report(&args, &repository, document_id, filename, true, None);
    }
    if duplicate {
        if registration.record().status == DocumentStatus::Processing {
            bail!("document {document_id} is already being processed");
        }
        repository.reset_pending(&document_id, &source_path.display().to_string())?;
    }

    let task_id = new_task_id(&document_id);
    repository.assign_task(&document_id, &task_id)?;

    let strategy = select_strategy(args.execution, &args.store.queue_dir(), || {
        Ok(Arc::new(Pipeline::new(
            Arc::clone(&repository),
            text_store(&args.store),
            Arc::new(PopplerOpener),
            ocr_capability(&args.extraction),
            extract_options(&args.extraction),
        )))
    })?;

    info!(
        doc_id = %document_id,
        task_id = %task_id,
        strategy = strategy.name(),
        ocr_mode = args.extraction.ocr_mode.as_str(),
        "submitting document"
    );
    strategy.submit(ProcessingJob {
        task_id,
        document_id: document_id.clone(),
        source_path,
    })?;
    strategy.wait_idle()?;

    report(&args, &repository, document_id, filename, duplicate, Some(strategy.name()))
}

fn report(
    args: &IngestArgs,
    repository: &DocumentRepository,
    document_id: String,
    filename: String,
    duplicate: bool,
    strategy: Option<&'static str>,
) -> Result<()> {
    let status = repository
        .task_status(&document_id)?
        .ok_or_else(|| anyhow!("document {document_id} missing from registry"))?;

    if args.json {
        return write_json(&IngestReport {
            document_id,
            filename,
            duplicate,
            strategy,
            status,
        });
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "File: {filename}")?;
    if duplicate {
        writeln!(output, "Duplicate of an existing document")?;
    }
    if let Some(strategy) = strategy {
        writeln!(output, "Execution: {strategy}")?;
    }
    write_task_status(&mut output, &status)?;
    output.flush()?;
    Ok(())
}
