use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{SearchMatch, TaskStatus};

pub fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub fn write_task_status(output: &mut impl Write, status: &TaskStatus) -> Result<()> {
    writeln!(output, "Document: {}", status.document_id)?;
    writeln!(
        output,
        "Status: {} ({}%) task={}",
        status.status,
        status.progress,
        status.task_id.as_deref().unwrap_or("-")
    )?;
    writeln!(
        output,
        "Created: {}  Completed: {}",
        status.created_at,
        status.completed_at.as_deref().unwrap_or("-")
    )?;
    if let Some(result) = &status.result {
        writeln!(
            output,
            "Result: pages={} used_ocr={} text_length={} compressed={} path={}",
            result.page_count,
            result.used_ocr,
            result.text_length,
            result.compressed,
            result.text_path
        )?;
        if let Some(extraction) = &result.extraction {
            writeln!(
                output,
                "Pages: ocr={} failed={} empty={}",
                extraction.ocr_page_count, extraction.failed_page_count, extraction.empty_page_count
            )?;
            for provenance in &extraction.pages {
                writeln!(
                    output,
                    "\tpage {}\t{:?}\t{}\tchars={}",
                    provenance.page, provenance.backend, provenance.reason, provenance.text_char_count
                )?;
            }
            for warning in &extraction.warnings {
                writeln!(output, "Warning: {warning}")?;
            }
        }
    }
    if let Some(error) = &status.error {
        writeln!(output, "Error: {error}")?;
    }
    Ok(())
}

pub fn write_match(output: &mut impl Write, rank: usize, found: &SearchMatch) -> Result<()> {
    writeln!(
        output,
        "{rank}.\tpage {}\toffset {}\tscore={:.3}\tmatch={}",
        found.page, found.position, found.score, found.snippet
    )?;
    writeln!(output, "\t{}", single_line(&found.context))?;
    Ok(())
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
