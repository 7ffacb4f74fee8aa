//! Byte-addressable artifact store rooted at a directory.
//!
//! Keys are storage-relative paths (e.g. `uploaded_files/contract.pdf`).
//! The pipeline only needs read/exists; save/delete serve upload
//! registration, attachment replacement, and soft deletion.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute filesystem path for a storage key.
    pub fn absolute_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.absolute_path(key).is_file()
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.absolute_path(key);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound("File not found.".to_string())
            } else {
                PipelineError::Extraction(format!("failed to read {}: {}", path.display(), e))
            }
        })
    }

    /// Stores `bytes` under `key`, creating parent directories. If the key is
    /// taken, a `_1`, `_2`, ... suffix is appended before the extension and
    /// the actually-used key is returned.
    pub fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let key = self.available_key(key);
        let path = self.absolute_path(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(key)
    }

    /// Removes the stored binary. Missing files are not an error; delete is
    /// used for cleanup paths that must be idempotent.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.absolute_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    fn available_key(&self, key: &str) -> String {
        if !self.exists(key) {
            return key.to_string();
        }
        let (stem, ext) = split_extension(key);
        for n in 1.. {
            let candidate = match ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            if !self.exists(&candidate) {
                return candidate;
            }
        }
        unreachable!()
    }
}

fn split_extension(key: &str) -> (&str, Option<&str>) {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some(ext) => (&key[..key.len() - ext.len() - 1], Some(ext)),
        None => (key, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let err = store.read("uploaded_files/nope.txt").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(err.to_string(), "File not found.");
    }

    #[test]
    fn save_then_read_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let key = store.save("uploaded_files/a.txt", b"hello").unwrap();
        assert_eq!(key, "uploaded_files/a.txt");
        assert!(store.exists(&key));
        assert_eq!(store.read(&key).unwrap(), b"hello");
    }

    #[test]
    fn save_avoids_clobbering_existing_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let first = store.save("attachments/report.pdf", b"one").unwrap();
        let second = store.save("attachments/report.pdf", b"two").unwrap();
        assert_eq!(first, "attachments/report.pdf");
        assert_eq!(second, "attachments/report_1.pdf");
        assert_eq!(store.read(&first).unwrap(), b"one");
        assert_eq!(store.read(&second).unwrap(), b"two");
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let key = store.save("uploaded_files/x.txt", b"x").unwrap();
        store.delete(&key).unwrap();
        assert!(!store.exists(&key));
        store.delete(&key).unwrap();
    }
}
