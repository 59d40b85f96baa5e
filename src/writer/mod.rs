//! Write-coalescing persistence coordinator.
//!
//! [`WriteCoordinator`] is the only path from the fetch core into the
//! [`PersistentStore`]. Per key it moves through `Idle → Writing → Idle`:
//!
//! - A `write` while the key is `Idle` spawns one physical write and moves
//!   the key to `Writing`.
//! - A `write` while the key is `Writing` attaches to that write instead of
//!   starting another. **First writer wins**: the payload of the call that
//!   started the write is the one persisted; joined payloads are discarded
//!   and joined callers observe the outcome of the single physical write.
//!
//! A successful `write` returns the payload that actually reached the store,
//! so a joined caller can tell its own bytes were not the ones persisted.
//!
//! Successfully written payloads are kept in a bounded backing map so reads
//! can skip the store. When the map is full the least-recently-used key is
//! evicted from memory (the store keeps it).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::join_all;
use lru::LruCache;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::flight::Flight;
use crate::store::PersistentStore;
use crate::sync::lock;

/// Default number of payloads kept in the backing map.
pub const DEFAULT_WRITE_CAPACITY: usize = 64;

/// Per-key write state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Writing,
}

struct State {
    writing: HashMap<String, Flight<Bytes>>,
    written: LruCache<String, Bytes>,
    next_id: u64,
}

impl State {
    fn complete(&mut self, key: &str, id: u64, result: &FetchResult<Bytes>) {
        let registered = self
            .writing
            .get(key)
            .is_some_and(|task| task.id() == id);
        if !registered {
            return;
        }
        self.writing.remove(key);

        if let Ok(payload) = result {
            if let Some((evicted, _)) = self.written.push(key.to_owned(), payload.clone()) {
                if evicted != key {
                    debug!(key = %evicted, "evicted least recently written payload");
                }
            }
        }
    }
}

/// Serializes and coalesces writes to a [`PersistentStore`], per key.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use rfetch::store::MemoryStore;
/// use rfetch::writer::WriteCoordinator;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// let writer = WriteCoordinator::new(store.clone());
///
/// let (a, b) = tokio::join!(
///     writer.write("root", Bytes::from_static(b"first")),
///     writer.write("root", Bytes::from_static(b"second")),
/// );
/// // The second call joined the first; both report what was persisted.
/// assert_eq!(a.unwrap(), Bytes::from_static(b"first"));
/// assert_eq!(b.unwrap(), Bytes::from_static(b"first"));
/// assert_eq!(store.write_count(), 1);
/// assert_eq!(writer.cached("root"), Some(Bytes::from_static(b"first")));
/// # }
/// ```
pub struct WriteCoordinator {
    store: Arc<dyn PersistentStore>,
    state: Arc<Mutex<State>>,
}

impl WriteCoordinator {
    /// Creates a coordinator with [`DEFAULT_WRITE_CAPACITY`].
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_WRITE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::with_capacity(store, capacity)
    }

    /// Creates a coordinator whose backing map holds at most `capacity` keys.
    pub fn with_capacity(store: Arc<dyn PersistentStore>, capacity: NonZeroUsize) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(State {
                writing: HashMap::new(),
                written: LruCache::new(capacity),
                next_id: 0,
            })),
        }
    }

    /// Persists `payload` under `key`, or joins the write already in progress.
    ///
    /// Returns the payload that reached the store. For a caller that joined
    /// an in-progress write this is the first writer's payload, not its own.
    ///
    /// # Errors
    ///
    /// [`FetchError::Storage`] if the physical write failed, or
    /// [`FetchError::Cancelled`] if it was aborted by
    /// [`cancel_all`](Self::cancel_all).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime when a write has to start.
    pub async fn write(&self, key: &str, payload: Bytes) -> FetchResult<Bytes> {
        let pending = {
            let mut state = lock(&self.state);
            match state.writing.get(key) {
                Some(task) => {
                    debug!(key, discarded = payload.len(), "joining in-progress write");
                    task.join()
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    debug!(key, id, bytes = payload.len(), "starting write");

                    let store = Arc::clone(&self.store);
                    let owner = Arc::clone(&self.state);
                    let owned_key = key.to_owned();
                    let task = Flight::spawn(id, async move {
                        let result = store
                            .write(&owned_key, payload.clone())
                            .await
                            .map(|()| payload)
                            .map_err(FetchError::from);
                        if let Err(e) = &result {
                            warn!(key = %owned_key, error = %e, "write failed");
                        }
                        lock(&owner).complete(&owned_key, id, &result);
                        result
                    });

                    let pending = task.join();
                    state.writing.insert(key.to_owned(), task);
                    pending
                }
            }
        };

        pending.await
    }

    /// Serializes `value` as JSON and [`write`](Self::write)s it.
    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> FetchResult<Bytes> {
        let payload = serde_json::to_vec(value).map_err(|e| FetchError::decode(key, e))?;
        self.write(key, Bytes::from(payload)).await
    }

    /// Writes every item concurrently, each through [`write`](Self::write).
    ///
    /// Waits for all of them; one failure never blocks or fails the others.
    /// Outcomes are returned in input order.
    pub async fn batch_write<I>(&self, items: I) -> Vec<(String, FetchResult<Bytes>)>
    where
        I: IntoIterator<Item = (String, Bytes)>,
    {
        let writes = items.into_iter().map(|(key, payload)| async move {
            let outcome = self.write(&key, payload).await;
            (key, outcome)
        });
        join_all(writes).await
    }

    /// Reads `key` from the backing map, falling back to the store.
    ///
    /// Best-effort freshness: while a write for `key` is in progress this
    /// returns the previous payload.
    pub async fn read(&self, key: &str) -> FetchResult<Option<Bytes>> {
        if let Some(payload) = self.cached(key) {
            return Ok(Some(payload));
        }
        Ok(self.store.read(key).await?)
    }

    /// Returns the last payload written for `key`, if still held in memory.
    pub fn cached(&self, key: &str) -> Option<Bytes> {
        lock(&self.state).written.get(key).cloned()
    }

    /// Deletes `key` from the store and the backing map.
    pub async fn remove(&self, key: &str) -> FetchResult<()> {
        lock(&self.state).written.pop(key);
        self.store.delete(key).await?;
        debug!(key, "payload removed");
        Ok(())
    }

    pub fn state(&self, key: &str) -> WriteState {
        if lock(&self.state).writing.contains_key(key) {
            WriteState::Writing
        } else {
            WriteState::Idle
        }
    }

    /// Number of keys currently `Writing`.
    pub fn pending_len(&self) -> usize {
        lock(&self.state).writing.len()
    }

    /// Aborts every in-progress write and clears the write-task map.
    ///
    /// Callers awaiting an aborted write receive [`FetchError::Cancelled`].
    /// Returns the number of writes aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, Flight<Bytes>)> = lock(&self.state).writing.drain().collect();
        for (key, task) in &drained {
            debug!(key = %key, id = task.id(), "cancelling write");
            task.cancel();
        }
        drained.len()
    }
}
