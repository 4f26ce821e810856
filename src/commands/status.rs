use std::io::{self, Write};

use anyhow::{Result, bail};
use tracing::debug;

use super::output::{write_json, write_task_status};
use crate::cli::StatusArgs;
use crate::repository::{DocumentRepository, StatusProvider};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    if !db_path.exists() {
        bail!("document registry missing: {}", db_path.display());
    }
    let repository = DocumentRepository::open(&db_path)?;
    debug!(doc_id = %args.document_id, "status requested");

    let Some(status) = repository.task_status(&args.document_id)? else {
        bail!("unknown document: {}", args.document_id);
    };

    if args.json {
        return write_json(&status);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    write_task_status(&mut output, &status)?;
    output.flush()?;
    Ok(())
}
