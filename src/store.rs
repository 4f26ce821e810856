use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::identity::validate_document_id;
use crate::util::ensure_directory;

pub const DEFAULT_COMPRESS_THRESHOLD: usize = 10 * 1024 * 1024;

const PLAIN_SUFFIX: &str = ".txt";
const COMPRESSED_SUFFIX: &str = ".txt.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextArtifact {
    pub document_id: String,
    pub path: PathBuf,
    pub compressed: bool,
}

impl TextArtifact {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if let Some(id) = name.strip_suffix(COMPRESSED_SUFFIX) {
            return Some(Self {
                document_id: id.to_string(),
                path: path.to_path_buf(),
                compressed: true,
            });
        }
        let id = name.strip_suffix(PLAIN_SUFFIX)?;
        Some(Self {
            document_id: id.to_string(),
            path: path.to_path_buf(),
            compressed: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TextStore {
    root: PathBuf,
    compress_threshold: usize,
}

impl TextStore {
    pub fn new(root: impl Into<PathBuf>, compress_threshold: usize) -> Self {
        Self {
            root: root.into(),
            compress_threshold,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the artifact through a temp file and rename so readers never see
    /// a partial text. Any artifact of the other form for the same id is removed.
    pub fn write(&self, document_id: &str, text: &str) -> Result<TextArtifact> {
        validate_document_id(document_id)?;
        ensure_directory(&self.root)?;

        let compressed = text.len() > self.compress_threshold;
        let plain_path = self.root.join(format!("{document_id}{PLAIN_SUFFIX}"));
        let compressed_path = self.root.join(format!("{document_id}{COMPRESSED_SUFFIX}"));
        let (final_path, stale_path) = if compressed {
            (compressed_path, plain_path)
        } else {
            (plain_path, compressed_path)
        };

        let staging_path = self.root.join(format!(".{document_id}.partial"));
        {
            let file = File::create(&staging_path)
                .with_context(|| format!("failed to create {}", staging_path.display()))?;
            let mut writer = BufWriter::new(file);
            if compressed {
                let mut encoder = GzEncoder::new(&mut writer, Compression::default());
                encoder
                    .write_all(text.as_bytes())
                    .with_context(|| format!("failed to compress {}", staging_path.display()))?;
                encoder
                    .finish()
                    .with_context(|| format!("failed to finalize {}", staging_path.display()))?;
            } else {
                writer
                    .write_all(text.as_bytes())
                    .with_context(|| format!("failed to write {}", staging_path.display()))?;
            }
            writer
                .flush()
                .with_context(|| format!("failed to flush {}", staging_path.display()))?;
        }

        fs::rename(&staging_path, &final_path).with_context(|| {
            format!(
                "failed to move {} to {}",
                staging_path.display(),
                final_path.display()
            )
        })?;

        if stale_path.exists() {
            fs::remove_file(&stale_path)
                .with_context(|| format!("failed to remove {}", stale_path.display()))?;
            debug!(path = %stale_path.display(), "removed stale text artifact");
        }

        info!(
            path = %final_path.display(),
            bytes = text.len(),
            compressed,
            "saved extracted text"
        );

        Ok(TextArtifact {
            document_id: document_id.to_string(),
            path: final_path,
            compressed,
        })
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        read_text(path)
    }

    pub fn locate(&self, document_id: &str) -> Result<Option<TextArtifact>> {
        validate_document_id(document_id)?;
        Ok(self
            .artifact_paths(document_id)
            .into_iter()
            .find(|path| path.is_file())
            .and_then(|path| TextArtifact::from_path(&path)))
    }

    /// Deletes every stored form of the document's text. Returns whether
    /// anything was there.
    pub fn remove(&self, document_id: &str) -> Result<bool> {
        validate_document_id(document_id)?;
        let mut removed = false;
        for path in self.artifact_paths(document_id) {
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                debug!(path = %path.display(), "removed text artifact");
                removed = true;
            }
        }
        Ok(removed)
    }

    fn artifact_paths(&self, document_id: &str) -> [PathBuf; 2] {
        [COMPRESSED_SUFFIX, PLAIN_SUFFIX].map(|suffix| self.root.join(format!("{document_id}{suffix}")))
    }

    pub fn list_artifacts(&self) -> Result<Vec<TextArtifact>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", self.root.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(artifact) = TextArtifact::from_path(&path) {
                artifacts.push(artifact);
            }
        }

        artifacts.sort_by(|left, right| left.path.cmp(&right.path));
        Ok(artifacts)
    }
}

pub fn read_text(path: &Path) -> Result<String> {
    let compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if !compressed {
        return fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()));
    }

    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .with_context(|| format!("failed to decompress {}", path.display()))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_is_written_plain() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path(), 1024);

        let artifact = store.write("doc_0011223344556677", "hello").unwrap();
        assert!(!artifact.compressed);
        assert!(artifact.path.ends_with("doc_0011223344556677.txt"));
        assert_eq!(store.read(&artifact.path).unwrap(), "hello");
    }

    #[test]
    fn large_text_is_compressed_and_read_back_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path(), 16);
        let text = "\n--- Page 1 ---\n".to_string() + &"lorem ipsum ".repeat(50);

        let artifact = store.write("big_0011223344556677", &text).unwrap();
        assert!(artifact.compressed);
        assert!(artifact.path.to_string_lossy().ends_with(".txt.gz"));
        assert!(fs::metadata(&artifact.path).unwrap().len() < text.len() as u64);
        assert_eq!(store.read(&artifact.path).unwrap(), text);
    }

    #[test]
    fn rewriting_in_other_form_removes_stale_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let small = TextStore::new(dir.path(), 1024);
        small.write("doc", "short").unwrap();

        let large = TextStore::new(dir.path(), 2);
        let artifact = large.write("doc", "longer text").unwrap();

        let listed = large.list_artifacts().unwrap();
        assert_eq!(listed, vec![artifact]);
        assert_eq!(large.locate("doc").unwrap().unwrap().path, listed[0].path);
    }

    #[test]
    fn list_artifacts_ignores_foreign_files_and_partials() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path(), 1024);
        store.write("b_doc", "b").unwrap();
        store.write("a_doc", "a").unwrap();
        fs::write(dir.path().join("notes.md"), "x").unwrap();
        fs::write(dir.path().join(".c_doc.partial"), "x").unwrap();

        let ids = store
            .list_artifacts()
            .unwrap()
            .into_iter()
            .map(|artifact| artifact.document_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a_doc".to_string(), "b_doc".to_string()]);
    }

    #[test]
    fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path().join("absent"), 1024);
        assert!(store.list_artifacts().unwrap().is_empty());
        assert!(store.locate("anything").unwrap().is_none());
    }

    #[test]
    fn traversal_ids_never_leave_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("texts");
        fs::write(dir.path().join("secret.txt"), "outside").unwrap();
        let store = TextStore::new(&root, 1024);

        assert!(store.locate("../secret").is_err());
        assert!(store.remove("../secret").is_err());
        assert!(store.write("../escaped", "x").is_err());
        assert!(dir.path().join("secret.txt").is_file());
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn remove_deletes_both_forms() {
        let dir = tempfile::tempdir().unwrap();
        let store = TextStore::new(dir.path(), 1024);
        store.write("doc", "short").unwrap();
        fs::write(dir.path().join("doc.txt.gz"), b"stale").unwrap();

        assert!(store.remove("doc").unwrap());
        assert!(store.locate("doc").unwrap().is_none());
        assert!(!store.remove("doc").unwrap());
    }

    #[test]
    fn corrupted_compressed_artifact_fails_to_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt.gz");
        fs::write(&path, b"definitely not gzip").unwrap();
        assert!(read_text(&path).is_err());
    }
}
