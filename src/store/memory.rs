//! In-process stores backed by mutex-guarded hash maps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;

use super::{PersistentStore, StorageError, TagStore};
use crate::sync::lock;

/// A [`PersistentStore`] that keeps payloads in memory.
///
/// Counts physical writes, which makes it handy for observing coalescing.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use rfetch::store::{MemoryStore, PersistentStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.write("root", Bytes::from_static(b"{}")).await.unwrap();
/// assert_eq!(store.read("root").await.unwrap(), Some(Bytes::from_static(b"{}")));
/// assert_eq!(store.write_count(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Bytes>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical writes performed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistentStore for MemoryStore {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
        Box::pin(async move { Ok(lock(&self.entries).get(key).cloned()) })
    }

    fn write<'a>(&'a self, key: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            lock(&self.entries).insert(key.to_owned(), payload);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            lock(&self.entries).remove(key);
            Ok(())
        })
    }
}

/// A [`TagStore`] that keeps entity tags in memory.
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    tags: Mutex<HashMap<String, String>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for MemoryTagStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.tags).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        lock(&self.tags).insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        lock(&self.tags).remove(key);
    }
}
