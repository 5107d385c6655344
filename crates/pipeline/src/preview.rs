//! Preview handles for converted outputs.
//!
//! A preview handle is a revocable resource referring to converted bytes, the
//! moral equivalent of an object URL. Each handle is revoked exactly once,
//! when its item is removed, the batch is cleared, or the pipeline is torn
//! down.

use crate::config::TargetFormat;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// A live reference to a converted output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PreviewHandle {
    pub id: Uuid,
    pub path: PathBuf,
}

/// Allocates and revokes preview handles.
pub trait PreviewStore: Send + Sync {
    /// Publish `bytes` and return a handle to them.
    fn allocate(&self, bytes: &[u8], format: TargetFormat) -> io::Result<PreviewHandle>;

    /// Release a handle. Unknown or already revoked handles are ignored.
    fn revoke(&self, handle: &PreviewHandle);

    /// Number of handles allocated and not yet revoked.
    fn live_count(&self) -> usize;
}

/// Preview store backed by files in a private temporary directory.
///
/// Dropping the store removes the directory and anything still in it.
pub struct TempDirPreviews {
    dir: TempDir,
    live: Mutex<HashSet<Uuid>>,
}

impl TempDirPreviews {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("heic-batch-previews").tempdir()?;
        Ok(Self {
            dir,
            live: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

impl PreviewStore for TempDirPreviews {
    fn allocate(&self, bytes: &[u8], format: TargetFormat) -> io::Result<PreviewHandle> {
        let id = Uuid::new_v4();
        let path = self.dir.path().join(format!("{}{}", id, format.extension()));
        fs::write(&path, bytes)?;

        if let Ok(mut live) = self.live.lock() {
            live.insert(id);
        }
        debug!(%id, path = %path.display(), "allocated preview");
        Ok(PreviewHandle { id, path })
    }

    fn revoke(&self, handle: &PreviewHandle) {
        let was_live = match self.live.lock() {
            Ok(mut live) => live.remove(&handle.id),
            Err(_) => false,
        };
        if !was_live {
            warn!(id = %handle.id, "ignoring revoke of unknown preview handle");
            return;
        }

        if let Err(e) = fs::remove_file(&handle.path) {
            warn!(id = %handle.id, error = %e, "failed to remove preview file");
        }
        debug!(id = %handle.id, "revoked preview");
    }

    fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_writes_file() {
        let store = TempDirPreviews::new().unwrap();
        let handle = store.allocate(b"jpeg bytes", TargetFormat::Jpeg).unwrap();

        assert!(handle.path.starts_with(store.dir()));
        assert_eq!(handle.path.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert_eq!(fs::read(&handle.path).unwrap(), b"jpeg bytes");
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn test_revoke_removes_file() {
        let store = TempDirPreviews::new().unwrap();
        let handle = store.allocate(b"png", TargetFormat::Png).unwrap();

        store.revoke(&handle);
        assert!(!handle.path.exists());
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_double_revoke_is_ignored() {
        let store = TempDirPreviews::new().unwrap();
        let a = store.allocate(b"a", TargetFormat::Webp).unwrap();
        let b = store.allocate(b"b", TargetFormat::Webp).unwrap();

        store.revoke(&a);
        store.revoke(&a);
        assert_eq!(store.live_count(), 1);
        assert!(b.path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let store = TempDirPreviews::new().unwrap();
        store.allocate(b"x", TargetFormat::Jpeg).unwrap();
        let dir = store.dir().to_path_buf();

        drop(store);
        assert!(!dir.exists());
    }
}
