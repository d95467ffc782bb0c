use crate::errors::ErrorKind;
use crate::prelude::*;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filesystem store for schema artifacts, one file per cluster key.
///
/// The store is the only writer of artifact bytes; the gateway only reads.
/// Writes go through a temp file and an atomic rename so a concurrent reader
/// never observes a half-written document.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(ArtifactStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ErrorKind::NotFoundError(format!("no artifact for key {key}")).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes `bytes` under `key`. Returns `false` when the stored content is
    /// already byte-identical, leaving the file (and its mtime) untouched.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<bool> {
        let path = self.path_for(key)?;
        if let Ok(existing) = fs::read(&path) {
            if existing == bytes {
                debug!("artifact {key} unchanged, skipping write");
                return Ok(false);
            }
        }
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        info!("wrote artifact {key} ({} bytes)", bytes.len());
        Ok(true)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("deleted artifact {key}");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Skip in-flight temp files.
            if name.starts_with('.') {
                continue;
            }
            keys.push(name.to_string());
        }
        keys.sort();
        Ok(keys)
    }
}

/// Cluster keys are single path segments; anything that could escape the
/// artifact directory is rejected.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ErrorKind::InvalidKeyError("key must not be empty".to_string()).into());
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(ErrorKind::InvalidKeyError(format!(
            "key {key:?} must be a single path segment"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");

        assert!(store.write("kubernetes", b"{}").expect("write"));
        assert_eq!(store.read("kubernetes").expect("read"), b"{}");
        assert_eq!(store.list().expect("list"), vec!["kubernetes".to_string()]);

        store.delete("kubernetes").expect("delete");
        assert!(store.read("kubernetes").expect_err("gone").is_not_found());
        // Deleting again is a no-op.
        store.delete("kubernetes").expect("delete twice");
    }

    #[test]
    fn write_is_noop_for_identical_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");

        assert!(store.write("root:alpha", b"first").expect("write"));
        assert!(!store.write("root:alpha", b"first").expect("rewrite"));
        assert!(store.write("root:alpha", b"second").expect("update"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");

        for key in ["", "a/b", "a\\b", "..", "../etc", "a..b"] {
            let err = store.write(key, b"x").expect_err("invalid key");
            assert!(
                matches!(err.kind(), ErrorKind::InvalidKeyError(_)),
                "key {key:?} should be invalid"
            );
        }
    }

    #[test]
    fn list_skips_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");

        store.write("one", b"1").expect("write");
        fs::write(dir.path().join(".two.tmp"), b"partial").expect("tmp");
        assert_eq!(store.list().expect("list"), vec!["one".to_string()]);
    }
}
