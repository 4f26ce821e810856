use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;

use super::output::write_json;
use crate::cli::ListArgs;
use crate::model::{DocumentRecord, DocumentStatus};
use crate::repository::DocumentRepository;

#[derive(Debug, Serialize)]
struct ListResponse {
    total: usize,
    counts: Vec<StatusCount>,
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Serialize)]
struct StatusCount {
    status: DocumentStatus,
    count: usize,
}

pub fn run(args: ListArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let (documents, counts) = if db_path.exists() {
        let repository = DocumentRepository::open(&db_path)?;
        (repository.list()?, repository.status_counts()?)
    } else {
        (
            Vec::new(),
            DocumentStatus::ALL.iter().map(|status| (*status, 0)).collect(),
        )
    };

    if args.json {
        return write_json(&ListResponse {
            total: documents.len(),
            counts: counts
                .into_iter()
                .map(|(status, count)| StatusCount { status, count })
                .collect(),
            documents,
        });
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    let summary = counts
        .iter()
        .map(|(status, count)| format!("{status}={count}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(output, "Documents: {} ({summary})", documents.len())?;

    for document in &documents {
        writeln!(
            output,
            "{}\t{}\t{:.2} MB\t{}\tpages {}",
            document.id,
            document.status,
            document.size_mb(),
            document.filename,
            document
                .page_count
                .map(|count| count.to_string())
                .unwrap_or_else(|| "-".to_string()),
        )?;
    }

    output.flush()?;
    Ok(())
}
