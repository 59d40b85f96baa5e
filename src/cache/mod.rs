//! Request-deduplicating TTL cache.
//!
//! [`DedupCache`] sits in front of transport calls. A lookup is answered in
//! one of three ways:
//!
//! 1. **Hit** — a cached value younger than the TTL is returned; the loader
//!    is not called.
//! 2. **Join** — a load for the same key is already running; the caller
//!    awaits its shared outcome instead of starting another one.
//! 3. **Load** — the loader is spawned as a Tokio task, registered as the
//!    key's in-flight request, and its outcome is handed to every waiter.
//!
//! Expiry is lazy: an entry older than the TTL is dropped on the next read
//! that touches it. When a capacity is configured the least-recently-used
//! entry is evicted on insert.
//!
//! Freshness is best-effort: a reader may be served a cached value while a
//! newer copy of the same resource is being written elsewhere.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use crate::error::FetchResult;
use crate::flight::{Flight, SharedResult};
use crate::sync::lock;

/// Default time-to-live for cached values (five minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

struct State<V> {
    entries: LruCache<String, CacheEntry<V>>,
    in_flight: HashMap<String, Flight<V>>,
    next_id: u64,
}

impl<V: Clone> State<V> {
    /// Records the outcome of flight `id`, unless `cancel_all` already dropped it.
    fn complete(&mut self, key: &str, id: u64, ttl: Duration, result: &FetchResult<V>) {
        let registered = self
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.id() == id);
        if !registered {
            return;
        }
        self.in_flight.remove(key);

        if let Ok(payload) = result {
            let entry = CacheEntry {
                payload: payload.clone(),
                stored_at: Instant::now(),
                ttl,
            };
            if let Some((evicted, _)) = self.entries.push(key.to_owned(), entry) {
                if evicted != key {
                    debug!(key = %evicted, "evicted least recently used entry");
                }
            }
        }
    }
}

/// A TTL cache that collapses concurrent loads of the same key.
///
/// Values are cloned out to every caller, so `V` should be cheap to clone
/// (e.g. [`Bytes`](bytes::Bytes) or a response holding one).
///
/// Loads run as spawned Tokio tasks: dropping one caller never cancels a
/// load other callers are waiting on. Only [`cancel_all`](Self::cancel_all)
/// aborts loads.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use rfetch::cache::DedupCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: DedupCache<Bytes> = DedupCache::new(Duration::from_secs(60));
///
/// let first = cache
///     .get("root", || async { Ok(Bytes::from_static(b"{}")) })
///     .await
///     .unwrap();
/// // Served from memory: the second loader is never called.
/// let second = cache
///     .get("root", || async { Ok(Bytes::new()) })
///     .await
///     .unwrap();
/// assert_eq!(first, second);
/// # }
/// ```
pub struct DedupCache<V> {
    state: Arc<Mutex<State<V>>>,
    default_ttl: Duration,
}

impl<V> DedupCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an unbounded cache.
    pub fn new(default_ttl: Duration) -> Self {
        Self::from_entries(default_ttl, LruCache::unbounded())
    }

    /// Creates a cache holding at most `capacity` entries.
    pub fn with_capacity(default_ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self::from_entries(default_ttl, LruCache::new(capacity))
    }

    fn from_entries(default_ttl: Duration, entries: LruCache<String, CacheEntry<V>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries,
                in_flight: HashMap::new(),
                next_id: 0,
            })),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Looks up `key` with the default TTL. See [`get_with_ttl`](Self::get_with_ttl).
    pub async fn get<F, Fut>(&self, key: &str, loader: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        self.get_with_ttl(key, self.default_ttl, loader).await
    }

    /// Looks up `key`, treating cached values older than `ttl` as absent.
    ///
    /// `loader` is only invoked when there is neither a fresh entry nor a
    /// load in flight. A successful load is cached; a failed one is not, and
    /// its error is returned to every caller that joined it.
    ///
    /// # Errors
    ///
    /// Whatever the loader fails with, or
    /// [`FetchError::Cancelled`](crate::error::FetchError::Cancelled) if the
    /// load was aborted by [`cancel_all`](Self::cancel_all).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime when a load has to start.
    pub async fn get_with_ttl<F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let pending = {
            let mut state = lock(&self.state);

            if let Some(entry) = state.entries.get(key) {
                if entry.is_fresh(ttl) {
                    debug!(key, "cache hit");
                    return Ok(entry.payload.clone());
                }
                debug!(key, age = ?entry.stored_at.elapsed(), "cache entry expired");
                state.entries.pop(key);
            }

            match state.in_flight.get(key) {
                Some(flight) => {
                    debug!(key, "joining in-flight request");
                    flight.join()
                }
                None => self.start_load(&mut state, key, ttl, loader()),
            }
        };

        pending.await
    }

    /// Spawns `load` and registers it as the in-flight request for `key`.
    fn start_load<Fut>(
        &self,
        state: &mut State<V>,
        key: &str,
        ttl: Duration,
        load: Fut,
    ) -> SharedResult<V>
    where
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let id = state.next_id;
        state.next_id += 1;
        debug!(key, id, "starting load");

        let owner = Arc::clone(&self.state);
        let owned_key = key.to_owned();
        let flight = Flight::spawn(id, async move {
            let result = load.await;
            lock(&owner).complete(&owned_key, id, ttl, &result);
            result
        });

        let pending = flight.join();
        state.in_flight.insert(key.to_owned(), flight);
        pending
    }

    /// Drops the cached value for `key`. Returns `true` if one was present.
    ///
    /// A load already in flight for `key` is not affected.
    pub fn invalidate(&self, key: &str) -> bool {
        lock(&self.state).entries.pop(key).is_some()
    }

    /// Drops every cached value.
    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    /// Drops every entry that has outlived the TTL it was stored with.
    ///
    /// Never required for correctness (reads expire lazily); useful to bound
    /// memory in long-lived unbounded caches. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = lock(&self.state);
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(entry.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        expired.len()
    }

    /// Number of cached values, fresh or not yet lazily expired.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads currently in flight.
    pub fn in_flight_len(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// Aborts every in-flight load and clears the in-flight registry.
    ///
    /// Every caller awaiting an aborted load receives
    /// [`FetchError::Cancelled`](crate::error::FetchError::Cancelled).
    /// Cached values are kept. Returns the number of loads aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, Flight<V>)> = lock(&self.state).in_flight.drain().collect();
        for (key, flight) in &drained {
            debug!(key = %key, id = flight.id(), "cancelling in-flight request");
            flight.cancel();
        }
        drained.len()
    }
}

impl<V> Default for DedupCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
