use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use super::output::write_json;
use crate::cli::DeleteArgs;
use crate::config::text_store;
use crate::identity::validate_document_id;
use crate::model::DocumentStatus;
use crate::repository::DocumentRepository;
use crate::store::TextStore;

#[derive(Debug, Serialize)]
struct DeletionReport {
    document_id: String,
    filename: Option<String>,
    registry_row_removed: bool,
    text_removed: bool,
    source_removed: bool,
}

pub fn run(args: DeleteArgs) -> Result<()> {
    let store = text_store(&args.store);
    let db_path = args.store.resolved_db_path();
    let repository = if db_path.exists() {
        Some(DocumentRepository::open(&db_path)?)
    } else {
        None
    };

    let report = delete_document(
        repository.as_ref(),
        &store,
        &args.document_id,
        args.remove_source,
    )?;

    if args.json {
        return write_json(&report);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Deleted: {}", report.document_id)?;
    if let Some(filename) = &report.filename {
        writeln!(output, "File: {filename}")?;
    }
    writeln!(
        output,
        "registry={} text={} source={}",
        report.registry_row_removed, report.text_removed, report.source_removed
    )?;
    output.flush()?;
    Ok(())
}

fn delete_document(
    repository: Option<&DocumentRepository>,
    store: &TextStore,
    document_id: &str,
    remove_source: bool,
) -> Result<DeletionReport> {
    validate_document_id(document_id)?;

    let record = match repository {
        Some(repository) => repository.get(document_id)?,
        None => None,
    };
    if record
        .as_ref()
        .is_some_and(|record| record.status == DocumentStatus::Processing)
    {
        bail!("document {document_id} is being processed; try again once it finishes");
    }

    let text_removed = store.remove(document_id)?;
    if record.is_none() && !text_removed {
        bail!("unknown document: {document_id}");
    }

    let source = record
        .as_ref()
        .filter(|_| remove_source)
        .map(|record| Path::new(&record.source_path))
        .filter(|source| source.is_file());
    let source_removed = match source {
        Some(source) => {
            fs::remove_file(source)
                .with_context(|| format!("failed to remove source {}", source.display()))?;
            true
        }
        None => false,
    };

    let registry_row_removed = match repository {
        Some(repository) => repository.delete(document_id)?.is_some(),
        None => false,
    };

    info!(
        doc_id = %document_id,
        text_removed,
        source_removed,
        registry_row_removed,
        "document deleted"
    );

    Ok(DeletionReport {
        document_id: document_id.to_string(),
        filename: record.map(|record| record.filename),
        registry_row_removed,
        text_removed,
        source_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::NewDocument;

    fn registered(repository: &DocumentRepository, id: &str, source: &Path) {
        repository
            .register(&NewDocument {
                id: id.to_string(),
                filename: format!("{id}.pdf"),
                source_path: source.display().to_string(),
                size_bytes: 5,
            })
            .unwrap();
    }

    #[test]
    fn delete_removes_row_text_and_optionally_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let repository = DocumentRepository::open_in_memory().unwrap();
        let store = TextStore::new(dir.path().join("texts"), 1024);
        let source = dir.path().join("a.pdf");
        fs::write(&source, b"%PDF-").unwrap();
        registered(&repository, "doc_a", &source);
        store.write("doc_a", "\n--- Page 1 ---\nbody").unwrap();

        let report = delete_document(Some(&repository), &store, "doc_a", false).unwrap();
        assert!(report.registry_row_removed);
        assert!(report.text_removed);
        assert!(!report.source_removed);
        assert_eq!(report.filename.as_deref(), Some("doc_a.pdf"));
        assert!(source.is_file());
        assert!(repository.get("doc_a").unwrap().is_none());
        assert!(store.locate("doc_a").unwrap().is_none());

        registered(&repository, "doc_b", &source);
        let report = delete_document(Some(&repository), &store, "doc_b", true).unwrap();
        assert!(report.source_removed);
        assert!(!report.text_removed);
        assert!(!source.exists());
    }

    #[test]
    fn documents_in_flight_are_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let repository = DocumentRepository::open_in_memory().unwrap();
        let store = TextStore::new(dir.path().join("texts"), 1024);
        registered(&repository, "doc_a", &dir.path().join("a.pdf"));
        repository.mark_processing("doc_a").unwrap();

        let error = delete_document(Some(&repository), &store, "doc_a", false).unwrap_err();
        assert!(error.to_string().contains("being processed"));
        assert!(repository.get("doc_a").unwrap().is_some());
    }

    #[test]
    fn unknown_and_path_like_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path().join("texts"), 1024);

        let error = delete_document(None, &store, "ghost", false).unwrap_err();
        assert!(error.to_string().contains("unknown document"));
        assert!(delete_document(None, &store, "../texts", false).is_err());
    }

    #[test]
    fn orphaned_text_is_removed_without_a_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path().join("texts"), 1024);
        store.write("loose", "\n--- Page 1 ---\nx").unwrap();

        let report = delete_document(None, &store, "loose", false).unwrap();
        assert!(report.text_removed);
        assert!(!report.registry_row_removed);
        assert!(report.filename.is_none());
    }
}
