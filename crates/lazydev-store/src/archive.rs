use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Uploaded archives on local disk, addressed by storage key.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage key for a job's source archive.
    pub fn key_for(job_id: &str) -> String {
        format!("jobs/{job_id}/source.zip")
    }

    /// Resolve a key to a path under the root, rejecting keys that escape it.
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Write `bytes` under `key`, creating parent directories.
    pub fn save(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        info!(key, bytes = bytes.len(), "archive stored");
        Ok(path)
    }

    /// Delete the archive and its now-empty job directory. Missing files are fine.
    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(key, "archive removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            // Only succeeds when empty.
            let _ = std::fs::remove_dir(parent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let key = ArchiveStore::key_for("abc");
        assert_eq!(key, "jobs/abc/source.zip");

        let path = store.save(&key, b"PK\x03\x04data").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04data");

        store.remove(&key).unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("jobs/abc").exists());
        // second removal is a no-op
        store.remove(&key).unwrap();
    }

    #[test]
    fn rejects_escaping_keys() {
        let store = ArchiveStore::new("/tmp/archives");
        assert!(store.path("../etc/passwd").is_err());
        assert!(store.path("/etc/passwd").is_err());
        assert!(store.path("").is_err());
        assert!(store.path("jobs/x/source.zip").is_ok());
    }
}
