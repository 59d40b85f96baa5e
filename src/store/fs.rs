//! Directory-backed persistent store.
//!
//! Each key maps to one file directly under the root directory. Writes go to
//! a sibling temp file first and are renamed into place, so a reader never
//! observes a torn payload. Every write gets its own temp file, so a write
//! still running on the blocking pool after its task was aborted never
//! shares a path with a newer write of the same key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use super::{PersistentStore, StorageError};

/// A [`PersistentStore`] writing one file per key under `root`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    next_tmp: Arc<AtomicU64>,
}

impl FsStore {
    /// Creates a store rooted at `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_tmp: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a key to its file path, rejecting keys that would escape `root`.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(key))
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        let n = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{key}.{}-{n}.tmp", std::process::id()))
    }
}

impl PersistentStore for FsStore {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::io("read", key, e)),
            }
        })
    }

    fn write<'a>(&'a self, key: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|e| StorageError::io("create directory for", key, e))?;

            let tmp = self.tmp_path_for(key);
            let committed = match tokio::fs::write(&tmp, &payload).await {
                Ok(()) => tokio::fs::rename(&tmp, &path)
                    .await
                    .map_err(|e| StorageError::io("commit", key, e)),
                Err(e) => Err(StorageError::io("write", key, e)),
            };
            if committed.is_err() {
                let _ = tokio::fs::remove_file(&tmp).await;
            }
            committed?;

            debug!(key, bytes = payload.len(), path = %path.display(), "payload persisted");
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::io("delete", key, e)),
            }
        })
    }
}
