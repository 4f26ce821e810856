use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::identity::content_hash_of;
use crate::model::{CompletionPayload, DocumentRecord, DocumentStatus, ExtractionSummary, TaskStatus};
use crate::util::{ensure_directory, now_utc_string};

const DOCUMENT_COLUMNS: &str = "id, filename, source_path, size_bytes, status, task_id, page_count, \
     used_ocr, text_path, text_length, error, created_at, completed_at, compressed";

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub filename: String,
    pub source_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub enum Registration {
    Created(DocumentRecord),
    Existing(DocumentRecord),
}

impl Registration {
    pub fn record(&self) -> &DocumentRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

/// Reports the lifecycle of a submitted document.
pub trait StatusProvider {
    fn task_status(&self, document_id: &str) -> Result<Option<TaskStatus>>;
}

/// SQLite-backed registry of every ingested document. Rows are inserted once
/// on registration and updated as the document moves through processing.
pub struct DocumentRepository {
    connection: Mutex<Connection>,
}

impl DocumentRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open document registry {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        debug!(path = %path.display(), "document registry opened");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory document registry")?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("document registry lock poisoned"))
    }

    /// Inserts a pending row, or returns the row already registered for the
    /// same content, even when it arrived under another filename.
    pub fn register(&self, document: &NewDocument) -> Result<Registration> {
        let connection = self.connection()?;
        if let Some(existing) = fetch(&connection, &document.id)? {
            debug!(doc_id = %document.id, status = %existing.status, "document already registered");
            return Ok(Registration::Existing(existing));
        }
        let same_content = match content_hash_of(&document.id) {
            Some(hash) => fetch_by_content_hash(&connection, hash)?,
            None => None,
        };
        if let Some(existing) = same_content {
            info!(
                doc_id = %existing.id,
                filename = %document.filename,
                "identical content already registered under another name"
            );
            return Ok(Registration::Existing(existing));
        }

        connection
            .execute(
                "INSERT INTO documents (id, filename, source_path, size_bytes, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    document.id,
                    document.filename,
                    document.source_path,
                    document.size_bytes as i64,
                    DocumentStatus::Pending.as_str(),
                    now_utc_string(),
                ],
            )
            .with_context(|| format!("failed to register document {}", document.id))?;
        info!(doc_id = %document.id, filename = %document.filename, "document registered");

        let created = fetch(&connection, &document.id)?
            .ok_or_else(|| anyhow!("document {} vanished after insert", document.id))?;
        Ok(Registration::Created(created))
    }

    /// Clears a previous outcome so the document can be processed again.
    pub fn reset_pending(&self, document_id: &str, source_path: &str) -> Result<()> {
        let connection = self.connection()?;
        let changed = connection
            .execute(
                "UPDATE documents
                 SET status = ?2, source_path = ?3, task_id = NULL, page_count = NULL,
                     used_ocr = NULL, text_path = NULL, text_length = NULL, error = NULL,
                     completed_at = NULL, compressed = NULL, extraction_json = NULL
                 WHERE id = ?1",
                params![document_id, DocumentStatus::Pending.as_str(), source_path],
            )
            .with_context(|| format!("failed to reset document {document_id}"))?;
        ensure_changed(changed, document_id)
    }

    pub fn assign_task(&self, document_id: &str, task_id: &str) -> Result<()> {
        let connection = self.connection()?;
        let changed = connection
            .execute(
                "UPDATE documents SET task_id = ?2 WHERE id = ?1",
                params![document_id, task_id],
            )
            .with_context(|| format!("failed to assign task to document {document_id}"))?;
        ensure_changed(changed, document_id)
    }

    pub fn mark_processing(&self, document_id: &str) -> Result<()> {
        self.set_status(document_id, DocumentStatus::Processing)
    }

    pub fn mark_completed(&self, document_id: &str, payload: &CompletionPayload) -> Result<()> {
        let extraction_json = payload
            .extraction
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .with_context(|| format!("failed to encode extraction summary for {document_id}"))?;

        let connection = self.connection()?;
        let changed = connection
            .execute(
                "UPDATE documents
                 SET status = ?2, page_count = ?3, used_ocr = ?4, text_path = ?5,
                     text_length = ?6, error = NULL, completed_at = ?7, compressed = ?8,
                     extraction_json = ?9
                 WHERE id = ?1",
                params![
                    document_id,
                    DocumentStatus::Completed.as_str(),
                    payload.page_count as i64,
                    payload.used_ocr,
                    payload.text_path,
                    payload.text_length as i64,
                    now_utc_string(),
                    payload.compressed,
                    extraction_json,
                ],
            )
            .with_context(|| format!("failed to mark document {document_id} completed"))?;
        ensure_changed(changed, document_id)
    }

    /// A failed document reports zero pages and keeps the error message.
    pub fn mark_failed(&self, document_id: &str, error: &str) -> Result<()> {
        let connection = self.connection()?;
        let changed = connection
            .execute(
                "UPDATE documents
                 SET status = ?2, page_count = 0, used_ocr = 0, text_path = NULL,
                     text_length = NULL, error = ?3, completed_at = ?4, compressed = NULL,
                     extraction_json = NULL
                 WHERE id = ?1",
                params![
                    document_id,
                    DocumentStatus::Failed.as_str(),
                    error,
                    now_utc_string(),
                ],
            )
            .with_context(|| format!("failed to mark document {document_id} failed"))?;
        ensure_changed(changed, document_id)
    }

    /// Removes the registry row and returns what it held.
    pub fn delete(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let connection = self.connection()?;
        let Some(record) = fetch(&connection, document_id)? else {
            return Ok(None);
        };
        connection
            .execute("DELETE FROM documents WHERE id = ?1", params![document_id])
            .with_context(|| format!("failed to delete document {document_id}"))?;
        info!(doc_id = %document_id, "document removed from registry");
        Ok(Some(record))
    }

    pub fn filenames(&self) -> Result<HashMap<String, String>> {
        let connection = self.connection()?;
        let mut statement = connection.prepare("SELECT id, filename FROM documents")?;
        let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut filenames = HashMap::new();
        for row in rows {
            let (id, filename) = row?;
            filenames.insert(id, filename);
        }
        Ok(filenames)
    }

    pub fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let connection = self.connection()?;
        fetch(&connection, document_id)
    }

    pub fn list(&self) -> Result<Vec<DocumentRecord>> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at, id"
        ))?;
        let rows = statement.query_map([], map_document)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Counts per status, in lifecycle order, including zero counts.
    pub fn status_counts(&self) -> Result<Vec<(DocumentStatus, usize)>> {
        let connection = self.connection()?;
        let mut counts = Vec::with_capacity(DocumentStatus::ALL.len());
        for status in DocumentStatus::ALL {
            let count: i64 = connection.query_row(
                "SELECT COUNT(*) FROM documents WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            counts.push((status, count as usize));
        }
        Ok(counts)
    }

    fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<()> {
        let connection = self.connection()?;
        let changed = connection
            .execute(
                "UPDATE documents SET status = ?2 WHERE id = ?1",
                params![document_id, status.as_str()],
            )
            .with_context(|| format!("failed to set document {document_id} to {status}"))?;
        ensure_changed(changed, document_id)
    }
}

impl StatusProvider for DocumentRepository {
    fn task_status(&self, document_id: &str) -> Result<Option<TaskStatus>> {
        let connection = self.connection()?;
        let Some(record) = fetch(&connection, document_id)? else {
            return Ok(None);
        };
        let extraction = fetch_extraction(&connection, document_id)?;
        Ok(Some(task_status_of(&record, extraction)))
    }
}

fn task_status_of(record: &DocumentRecord, extraction: Option<ExtractionSummary>) -> TaskStatus {
    let result = match (record.status, &record.text_path) {
        (DocumentStatus::Completed, Some(text_path)) => Some(CompletionPayload {
            page_count: record.page_count.unwrap_or(0),
            used_ocr: record.used_ocr.unwrap_or(false),
            text_path: text_path.clone(),
            text_length: record.text_length.unwrap_or(0),
            compressed: record.compressed.unwrap_or(false),
            extraction,
        }),
        _ => None,
    };

    TaskStatus {
        document_id: record.id.clone(),
        task_id: record.task_id.clone(),
        status: record.status,
        progress: record.status.progress(),
        result,
        error: record.error.clone(),
        created_at: record.created_at.clone(),
        completed_at: record.completed_at.clone(),
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .busy_timeout(std::time::Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
              id TEXT PRIMARY KEY,
              filename TEXT NOT NULL,
              source_path TEXT NOT NULL,
              size_bytes INTEGER NOT NULL,
              status TEXT NOT NULL,
              task_id TEXT,
              page_count INTEGER,
              used_ocr INTEGER,
              text_path TEXT,
              text_length INTEGER,
              error TEXT,
              created_at TEXT NOT NULL,
              completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            ",
        )
        .context("failed to create document registry schema")?;

    ensure_column_exists(connection, "documents", "compressed INTEGER")?;
    ensure_column_exists(connection, "documents", "extraction_json TEXT")?;
    Ok(())
}

fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_name) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };

    let mut statement = connection
        .prepare(&format!("PRAGMA table_info({table_name})"))
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    connection
        .execute(
            &format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}"),
            [],
        )
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;
    debug!(table = table_name, column = column_name, "registry column added");
    Ok(())
}

fn fetch(connection: &Connection, document_id: &str) -> Result<Option<DocumentRecord>> {
    let record = connection
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![document_id],
            map_document,
        )
        .optional()
        .with_context(|| format!("failed to load document {document_id}"))?;
    record.transpose()
}

fn fetch_extraction(connection: &Connection, document_id: &str) -> Result<Option<ExtractionSummary>> {
    let raw: Option<String> = connection
        .query_row(
            "SELECT extraction_json FROM documents WHERE id = ?1",
            params![document_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .with_context(|| format!("failed to load extraction summary for {document_id}"))?
        .flatten();
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .with_context(|| format!("document {document_id} has an unreadable extraction summary"))
    })
    .transpose()
}

fn fetch_by_content_hash(connection: &Connection, hash: &str) -> Result<Option<DocumentRecord>> {
    let record = connection
        .query_row(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE substr(id, length(id) - length(?1)) = '_' || ?1
                 ORDER BY created_at, id
                 LIMIT 1"
            ),
            params![hash],
            map_document,
        )
        .optional()
        .with_context(|| format!("failed to look up content hash {hash}"))?;
    record.transpose()
}

// The status column is parsed outside rusqlite so a bad value surfaces as an
// anyhow error naming the document.
fn map_document(row: &Row<'_>) -> rusqlite::Result<Result<DocumentRecord>> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let size_bytes: i64 = row.get(3)?;
    let page_count: Option<i64> = row.get(6)?;
    let text_length: Option<i64> = row.get(9)?;

    let record = DocumentRecord {
        filename: row.get(1)?,
        source_path: row.get(2)?,
        size_bytes: size_bytes.max(0) as u64,
        status: DocumentStatus::Pending,
        task_id: row.get(5)?,
        page_count: page_count.map(|value| value.max(0) as usize),
        used_ocr: row.get(7)?,
        text_path: row.get(8)?,
        text_length: text_length.map(|value| value.max(0) as usize),
        error: row.get(10)?,
        created_at: row.get(11)?,
        completed_at: row.get(12)?,
        compressed: row.get(13)?,
        id,
    };

    Ok(status
        .parse::<DocumentStatus>()
        .with_context(|| format!("document {} has an invalid status", record.id))
        .map(|status| DocumentRecord { status, ..record }))
}

fn ensure_changed(changed: usize, document_id: &str) -> Result<()> {
    if changed == 0 {
        bail!("unknown document: {document_id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PageBackend, PageProvenance};

    fn new_document(id: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            source_path: format!("/uploads/{id}.pdf"),
            size_bytes: 2 * 1024 * 1024,
        }
    }

    fn completion() -> CompletionPayload {
        CompletionPayload {
            page_count: 12,
            used_ocr: true,
            text_path: "/texts/doc_a.txt".to_string(),
            text_length: 4096,
            compressed: false,
            extraction: None,
        }
    }

    #[test]
    fn registration_is_idempotent_per_id() {
        let repository = DocumentRepository::open_in_memory().unwrap();

        let first = repository.register(&new_document("doc_a")).unwrap();
        assert!(matches!(first, Registration::Created(_)));
        assert_eq!(first.record().status, DocumentStatus::Pending);
        assert_eq!(first.record().page_count, None);

        let second = repository.register(&new_document("doc_a")).unwrap();
        assert!(matches!(second, Registration::Existing(_)));
        assert_eq!(repository.list().unwrap().len(), 1);
    }

    #[test]
    fn identical_content_under_another_name_is_a_duplicate() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository
            .register(&new_document("scan_0123456789abcdef"))
            .unwrap();

        let renamed = repository
            .register(&new_document("renamed_copy_0123456789abcdef"))
            .unwrap();
        assert!(matches!(renamed, Registration::Existing(_)));
        assert_eq!(renamed.record().id, "scan_0123456789abcdef");

        let different = repository
            .register(&new_document("scan_fedcba9876543210"))
            .unwrap();
        assert!(matches!(different, Registration::Created(_)));
        assert_eq!(repository.list().unwrap().len(), 2);
    }

    #[test]
    fn lifecycle_updates_are_visible_through_status_provider() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository.register(&new_document("doc_a")).unwrap();
        repository.assign_task("doc_a", "task-1").unwrap();

        let pending = repository.task_status("doc_a").unwrap().unwrap();
        assert_eq!(pending.status, DocumentStatus::Pending);
        assert_eq!(pending.progress, 0);
        assert_eq!(pending.task_id.as_deref(), Some("task-1"));

        repository.mark_processing("doc_a").unwrap();
        assert_eq!(
            repository.task_status("doc_a").unwrap().unwrap().progress,
            50
        );

        repository.mark_completed("doc_a", &completion()).unwrap();
        let done = repository.task_status("doc_a").unwrap().unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        let result = done.result.unwrap();
        assert_eq!(result.page_count, 12);
        assert!(result.used_ocr);
        assert_eq!(result.text_length, 4096);
    }

    #[test]
    fn completion_keeps_compression_and_extraction_summary() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository.register(&new_document("doc_a")).unwrap();
        let summary = ExtractionSummary {
            ocr_page_count: 1,
            failed_page_count: 1,
            empty_page_count: 0,
            warnings: vec!["page 2: extraction failed; placeholder text recorded".to_string()],
            pages: vec![PageProvenance {
                page: 1,
                backend: PageBackend::Ocr,
                reason: "ocr_empty_text_layer".to_string(),
                text_char_count: 42,
                ocr_char_count: Some(42),
                dpi: Some(300),
            }],
        };
        let payload = CompletionPayload {
            compressed: true,
            extraction: Some(summary.clone()),
            ..completion()
        };

        repository.mark_completed("doc_a", &payload).unwrap();
        let result = repository.task_status("doc_a").unwrap().unwrap().result.unwrap();
        assert!(result.compressed);
        assert_eq!(result.extraction, Some(summary));
        assert_eq!(repository.get("doc_a").unwrap().unwrap().compressed, Some(true));

        repository.reset_pending("doc_a", "/uploads/doc_a.pdf").unwrap();
        repository.mark_completed("doc_a", &completion()).unwrap();
        let result = repository.task_status("doc_a").unwrap().unwrap().result.unwrap();
        assert!(!result.compressed);
        assert_eq!(result.extraction, None);
    }

    #[test]
    fn delete_removes_the_row_and_returns_it() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository.register(&new_document("doc_a")).unwrap();
        repository.register(&new_document("doc_b")).unwrap();

        let deleted = repository.delete("doc_a").unwrap().unwrap();
        assert_eq!(deleted.filename, "doc_a.pdf");
        assert!(repository.get("doc_a").unwrap().is_none());
        assert!(repository.delete("doc_a").unwrap().is_none());

        let filenames = repository.filenames().unwrap();
        assert_eq!(filenames.len(), 1);
        assert_eq!(filenames.get("doc_b").map(String::as_str), Some("doc_b.pdf"));
    }

    #[test]
    fn registry_without_new_columns_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.sqlite");
        {
            let connection = Connection::open(&path).unwrap();
            connection
                .execute_batch(
                    "CREATE TABLE documents (
                      id TEXT PRIMARY KEY, filename TEXT NOT NULL, source_path TEXT NOT NULL,
                      size_bytes INTEGER NOT NULL, status TEXT NOT NULL, task_id TEXT,
                      page_count INTEGER, used_ocr INTEGER, text_path TEXT, text_length INTEGER,
                      error TEXT, created_at TEXT NOT NULL, completed_at TEXT
                    );",
                )
                .unwrap();
        }

        let repository = DocumentRepository::open(&path).unwrap();
        repository.register(&new_document("doc_a")).unwrap();
        repository.mark_completed("doc_a", &completion()).unwrap();
        assert_eq!(repository.get("doc_a").unwrap().unwrap().compressed, Some(false));
    }

    #[test]
    fn failure_records_zero_pages_and_error() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository.register(&new_document("doc_b")).unwrap();
        repository.mark_processing("doc_b").unwrap();
        repository
            .mark_failed("doc_b", "document not found: /uploads/doc_b.pdf")
            .unwrap();

        let record = repository.get("doc_b").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.page_count, Some(0));
        assert_eq!(record.used_ocr, Some(false));
        assert!(record.text_path.is_none());
        assert!(record.error.unwrap().contains("not found"));

        let status = repository.task_status("doc_b").unwrap().unwrap();
        assert!(status.result.is_none());
    }

    #[test]
    fn reset_clears_previous_outcome() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        repository.register(&new_document("doc_a")).unwrap();
        repository.mark_failed("doc_a", "boom").unwrap();

        repository.reset_pending("doc_a", "/uploads/again.pdf").unwrap();
        let record = repository.get("doc_a").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Pending);
        assert_eq!(record.source_path, "/uploads/again.pdf");
        assert!(record.error.is_none());
        assert!(record.page_count.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn updates_to_unknown_documents_fail() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        let error = repository.mark_processing("missing").unwrap_err();
        assert!(error.to_string().contains("unknown document"));
        assert!(repository.get("missing").unwrap().is_none());
        assert!(repository.task_status("missing").unwrap().is_none());
    }

    #[test]
    fn status_counts_cover_every_state() {
        let repository = DocumentRepository::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            repository.register(&new_document(id)).unwrap();
        }
        repository.mark_processing("b").unwrap();
        repository.mark_completed("c", &completion()).unwrap();

        let counts = repository.status_counts().unwrap();
        assert_eq!(
            counts,
            vec![
                (DocumentStatus::Pending, 1),
                (DocumentStatus::Processing, 1),
                (DocumentStatus::Completed, 1),
                (DocumentStatus::Failed, 0),
            ]
        );
    }

    #[test]
    fn file_backed_registry_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("folio.sqlite");
        {
            let repository = DocumentRepository::open(&path).unwrap();
            repository.register(&new_document("doc_a")).unwrap();
        }
        let reopened = DocumentRepository::open(&path).unwrap();
        let record = reopened.get("doc_a").unwrap().unwrap();
        assert_eq!(record.filename, "doc_a.pdf");
        assert_eq!(record.size_mb(), 2.0);
    }
}
