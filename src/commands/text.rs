use std::io::{self, Write};

use anyhow::{Context, Result, bail};

use super::search::locate_text;
use crate::cli::TextArgs;
use crate::config::text_store;
use crate::page_index::PageIndex;

pub fn run(args: TextArgs) -> Result<()> {
    let store = text_store(&args.store);
    let artifact = locate_text(&args.store, &store, &args.document_id)?;
    let text = store.read(&artifact.path)?;

    let selected = match args.page {
        Some(page) => {
            let index = PageIndex::build(&text)?;
            let Some((begin, end)) = index.page_span(page, text.len()) else {
                bail!(
                    "document {} has no page {page} ({} pages)",
                    args.document_id,
                    index.page_count()
                );
            };
            &text[begin..end]
        }
        None => text.as_str(),
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    output
        .write_all(selected.as_bytes())
        .context("failed to write document text")?;
    if !selected.ends_with('\n') {
        writeln!(output)?;
    }
    output.flush()?;
    Ok(())
}
