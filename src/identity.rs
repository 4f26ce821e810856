use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::util::sha256_file;

const HASH_PREFIX_LEN: usize = 16;
const NAME_FRAGMENT_LEN: usize = 30;

/// Content-addressed document id: `<sanitized stem>_<first 16 hex chars of sha256>`.
///
/// Byte-identical uploads share the hash half, so re-processing can be
/// detected without trusting filenames.
pub fn document_id_for_path(path: &Path) -> Result<String> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
    let digest = sha256_file(path)?;
    compose_document_id(filename, &digest)
}

pub fn content_hash_of(document_id: &str) -> Option<&str> {
    let (_, hash) = document_id.rsplit_once('_')?;
    if hash.len() == HASH_PREFIX_LEN && hash.chars().all(|character| character.is_ascii_hexdigit())
    {
        Some(hash)
    } else {
        None
    }
}

/// Rejects ids that would resolve outside the directory they are joined onto.
pub fn validate_document_id(document_id: &str) -> Result<()> {
    if document_id.is_empty() {
        bail!("document id is empty");
    }
    let has_separator = document_id
        .chars()
        .any(|character| matches!(character, '/' | '\\' | ':' | '\0'));
    if has_separator || document_id.starts_with('.') || document_id.contains("..") {
        bail!("invalid document id: {document_id:?}");
    }
    Ok(())
}

fn compose_document_id(filename: &str, digest: &str) -> Result<String> {
    let pattern = Regex::new(r"[^\w\-]").context("failed to compile name sanitizer regex")?;
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(filename);

    let sanitized = pattern.replace_all(stem, "_");
    let fragment = sanitized.chars().take(NAME_FRAGMENT_LEN).collect::<String>();
    let hash = &digest[..HASH_PREFIX_LEN.min(digest.len())];

    Ok(format!("{fragment}_{hash}"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn id_for(dir: &Path, filename: &str, bytes: &[u8]) -> String {
        let path = dir.join(filename);
        fs::write(&path, bytes).unwrap();
        document_id_for_path(&path).unwrap()
    }

    #[test]
    fn identical_bytes_share_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let first = id_for(dir.path(), "scan.pdf", b"same bytes");
        let second = id_for(dir.path(), "renamed copy.pdf", b"same bytes");

        assert_ne!(first, second);
        assert_eq!(content_hash_of(&first), content_hash_of(&second));
        assert!(content_hash_of(&first).is_some());
    }

    #[test]
    fn identical_name_and_bytes_yield_identical_id() {
        let first = id_for(tempfile::tempdir().unwrap().path(), "report.pdf", b"payload");
        let second = id_for(tempfile::tempdir().unwrap().path(), "report.pdf", b"payload");
        assert_eq!(first, second);
        assert!(first.starts_with("report_"));
    }

    #[test]
    fn name_fragment_is_sanitized_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let id = id_for(
            dir.path(),
            "Informe anual (2023) versión final con anexos largos.pdf",
            b"x",
        );
        let (fragment, hash) = id.rsplit_once('_').unwrap();

        assert_eq!(hash.len(), 16);
        assert_eq!(fragment.chars().count(), 30);
        assert!(fragment.starts_with("Informe_anual__2023__versión"));
        assert!(!fragment.contains(' '));
        assert!(!fragment.contains('('));
    }

    #[test]
    fn generated_ids_pass_validation() {
        let dir = tempfile::tempdir().unwrap();
        let id = id_for(dir.path(), "..weird..name: v2.pdf", b"x");
        assert!(validate_document_id(&id).is_ok());
    }

    #[test]
    fn path_like_ids_are_rejected() {
        for id in ["", "../secret", "a/b", "a\\b", "..", ".hidden", "c:evil", "x..y"] {
            assert!(validate_document_id(id).is_err(), "{id:?} should be rejected");
        }
        assert!(validate_document_id("report_0123456789abcdef").is_ok());
    }

    #[test]
    fn content_hash_of_rejects_non_ids() {
        assert_eq!(content_hash_of("plain-name"), None);
        assert_eq!(content_hash_of("name_nothex"), None);
    }
}
