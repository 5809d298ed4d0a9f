//! Raw object store
//!
//! Filesystem blob store for raw thought payloads
//! (`thoughts/{user}/{date}/{id}.json`) and cached theme graphs
//! (`graph/{user}/{window}-v2.json`). Writes land via a temp file plus
//! rename so a reader never observes a partial blob.

use std::path::{Path, PathBuf};

use super::{Result, StoreError};

/// Filesystem-backed object store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating the root directory if needed).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a key to an on-disk path, rejecting traversal segments.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StoreError::Init(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }

    /// Write a blob, replacing any existing object under `key`.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read a blob; `None` when absent.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Modification time of a blob as epoch ms; `None` when absent.
    pub fn modified_at(&self, key: &str) -> Result<Option<i64>> {
        let path = self.resolve(key)?;
        match std::fs::metadata(&path) {
            Ok(meta) => {
                let modified = meta.modified()?;
                let ms = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                Ok(Some(ms))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob. Missing objects are fine (lazy cache deletion).
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The root directory (test helper).
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path().join("objects")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, s) = store();
        s.put("thoughts/u1/2026-01-02/t_x.json", b"{\"a\":1}").unwrap();
        assert_eq!(
            s.get("thoughts/u1/2026-01-02/t_x.json").unwrap().unwrap(),
            b"{\"a\":1}"
        );
        assert!(s.get("thoughts/u1/2026-01-02/missing.json").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_is_safe() {
        let (_dir, s) = store();
        s.put("graph/u1/all-v2.json", b"one").unwrap();
        s.put("graph/u1/all-v2.json", b"two").unwrap();
        assert_eq!(s.get("graph/u1/all-v2.json").unwrap().unwrap(), b"two");
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (_dir, s) = store();
        s.delete("graph/u1/all-v2.json").unwrap();
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let (_dir, s) = store();
        assert!(s.put("../escape", b"x").is_err());
        assert!(s.put("/absolute", b"x").is_err());
        assert!(s.put("a//b", b"x").is_err());
        assert!(s.get("..").is_err());
    }

    #[test]
    fn test_modified_at_present_after_put() {
        let (_dir, s) = store();
        assert!(s.modified_at("k/v.json").unwrap().is_none());
        s.put("k/v.json", b"x").unwrap();
        assert!(s.modified_at("k/v.json").unwrap().unwrap() > 0);
    }
}
