//! Storage seams: durable key→bytes payloads and the ETag side table.
//!
//! ## Core types
//!
//! - [`PersistentStore`] — async key→bytes storage the write coordinator
//!   persists into and the repository falls back to on `304`.
//! - [`TagStore`] — small synchronous key→string store for entity tags.
//! - [`MemoryStore`], [`MemoryTagStore`] — in-process implementations.
//! - [`FsStore`] — one file per key under a root directory.

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::{MemoryStore, MemoryTagStore};

/// Errors produced by a [`PersistentStore`].
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("failed to {op} {key}: {message}")]
    Io {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
}

impl StorageError {
    pub(crate) fn io(op: &'static str, key: &str, err: std::io::Error) -> Self {
        Self::Io {
            op,
            key: key.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Durable key→bytes storage.
///
/// Implementations must be `Send + Sync`; they are shared behind an `Arc`
/// by the write coordinator and the repository.
pub trait PersistentStore: Send + Sync {
    /// Reads the payload stored under `key`, or `None` if there is none.
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>>;

    /// Stores `payload` under `key`, replacing any previous payload.
    fn write<'a>(&'a self, key: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Deletes the payload stored under `key`. Deleting a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Small key→string store for entity tags.
///
/// Calls are cheap and synchronous; implementations serialize access
/// internally.
pub trait TagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);
}
