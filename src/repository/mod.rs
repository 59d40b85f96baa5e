//! Conditional fetch repository, the entry point callers use.
//!
//! [`Repository`] ties the other subsystems together for each fetch:
//!
//! 1. Derive the resource's cache key and look up its stored entity tag.
//! 2. Issue the GET through the [`DedupCache`], with `if-none-match` when a
//!    tag is known.
//! 3. On `304`, decode the locally persisted payload.
//! 4. On `2xx`, decode the body, persist the raw bytes through the
//!    [`WriteCoordinator`], and only then store the new tag.
//!
//! A tag is never stored for a payload that failed to decode or to persist,
//! nor when the write joined one carrying a different body, so the tag store
//! never points at data that is not on disk.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::DedupCache;
use crate::config::{Config, ConfigError};
use crate::error::{FetchError, FetchResult};
use crate::executor::BoundedExecutor;
use crate::http::{IF_NONE_MATCH, Request, Response};
use crate::store::{MemoryStore, MemoryTagStore, PersistentStore, TagStore};
use crate::transport::{HttpTransport, Transport};
use crate::writer::WriteCoordinator;

pub mod key;

pub use key::{KEY_SUFFIX, ROOT_KEY, cache_key};

/// Fetches JSON resources with ETag revalidation, request dedup and
/// coalesced persistence.
///
/// # Examples
///
/// ```rust,no_run
/// use rfetch::config::Config;
/// use rfetch::repository::Repository;
///
/// #[derive(serde::Deserialize)]
/// struct Page {
///     title: String,
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default().with_base_url("http://127.0.0.1:8080/api/");
///     let repository = Repository::builder(config).build()?;
///
///     let root: Page = repository.fetch_root().await?;
///     println!("{}", root.title);
///     Ok(())
/// }
/// ```
pub struct Repository {
    base_url: Url,
    transport: Arc<dyn Transport>,
    cache: DedupCache<Response>,
    writer: WriteCoordinator,
    tags: Arc<dyn TagStore>,
    executor: BoundedExecutor,
}

impl Repository {
    /// Starts assembling a repository from `config`.
    pub fn builder(config: Config) -> RepositoryBuilder {
        RepositoryBuilder::new(config)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn cache(&self) -> &DedupCache<Response> {
        &self.cache
    }

    pub fn writer(&self) -> &WriteCoordinator {
        &self.writer
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Fetches the root resource (the base URL), cached under [`ROOT_KEY`].
    pub async fn fetch_root<T: DeserializeOwned>(&self) -> FetchResult<T> {
        self.fetch_at(self.base_url.clone(), ROOT_KEY.to_owned()).await
    }

    /// Fetches the resource `id`, an absolute URL or a path relative to the
    /// base URL. Cached under its trailing path segment plus [`KEY_SUFFIX`].
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidResource`] — `id` has no usable URL or key.
    /// - [`FetchError::Transport`] / [`FetchError::Status`] — the GET failed.
    /// - [`FetchError::Decode`] — the body is not the expected JSON.
    /// - [`FetchError::Storage`] — persisting or reading the payload failed.
    /// - [`FetchError::StaleCacheMiss`] — `304` with no local copy.
    pub async fn fetch_resource<T: DeserializeOwned>(&self, id: &str) -> FetchResult<T> {
        let (url, key) = self.resolve(id)?;
        self.fetch_at(url, key).await
    }

    /// Fetches many resources through the executor's sliding window.
    ///
    /// Each id gets its own outcome; one failure never affects the others.
    pub async fn fetch_many<T, I, S>(&self, ids: I) -> HashMap<String, FetchResult<T>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tasks = ids.into_iter().map(|id| {
            let id: String = id.into();
            (id.clone(), async move {
                let (url, key) = self.resolve(&id)?;
                self.fetch_at::<T>(url, key).await
            })
        });
        self.executor.run_batch(tasks, self.executor.limit()).await
    }

    /// Forgets everything known about `id`: the cached response, the stored
    /// tag and the persisted payload. The next fetch is unconditional.
    pub async fn invalidate(&self, id: &str) -> FetchResult<()> {
        let (url, key) = self.resolve(id)?;
        self.forget(&url, &key).await
    }

    /// Like [`invalidate`](Self::invalidate) for the root resource.
    pub async fn invalidate_root(&self) -> FetchResult<()> {
        let url = self.base_url.clone();
        self.forget(&url, ROOT_KEY).await
    }

    /// Aborts every in-flight request and write.
    ///
    /// Callers awaiting them receive [`FetchError::Cancelled`].
    pub fn cancel_all(&self) {
        let requests = self.cache.cancel_all();
        let writes = self.writer.cancel_all();
        info!(requests, writes, "cancelled all in-flight operations");
    }

    async fn forget(&self, url: &Url, key: &str) -> FetchResult<()> {
        self.cache.invalidate(url.as_str());
        self.tags.remove(key);
        self.writer.remove(key).await?;
        debug!(url = %url, key, "resource invalidated");
        Ok(())
    }

    fn resolve(&self, id: &str) -> FetchResult<(Url, String)> {
        let url = self
            .base_url
            .join(id)
            .map_err(|e| FetchError::InvalidResource {
                id: id.to_owned(),
                reason: e.to_string(),
            })?;
        let key = cache_key(&url).ok_or_else(|| FetchError::InvalidResource {
            id: id.to_owned(),
            reason: "URL has no path segment to derive a cache key from".to_owned(),
        })?;
        Ok((url, key))
    }

    async fn fetch_at<T: DeserializeOwned>(&self, url: Url, key: String) -> FetchResult<T> {
        let etag = self.tags.get(&key);
        let mut request = Request::get(url.clone());
        if let Some(tag) = &etag {
            request = request.header(IF_NONE_MATCH, tag.as_str());
        }
        debug!(url = %url, key = %key, etag = ?etag, "fetching");

        let transport = Arc::clone(&self.transport);
        let loader_url = url.clone();
        let response = self
            .cache
            .get(url.as_str(), move || async move {
                let response = transport.get(request).await?;
                let status = response.status();
                if status.is_success() || status.is_not_modified() {
                    Ok(response)
                } else {
                    Err(FetchError::Status {
                        url: loader_url.to_string(),
                        status,
                    })
                }
            })
            .await?;

        if response.status().is_not_modified() {
            debug!(key = %key, "not modified, serving persisted copy");
            return self.read_persisted(&key).await;
        }

        let body = response.body_bytes().clone();
        let value = decode(&key, &body)?;

        // A cache hit replays a body that is already persisted.
        let already_stored = self.writer.cached(&key).as_ref() == Some(&body);
        if !already_stored {
            let stored = match self.writer.write(&key, body.clone()).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(key = %key, error = %e, "payload not persisted, keeping previous tag");
                    return Err(e);
                }
            };
            // Joined another response's write: the store holds that body, not ours.
            if stored != body {
                debug!(key = %key, "write coalesced with a different payload, tag left as is");
                return Ok(value);
            }
        }
        if let Some(tag) = response.etag() {
            self.tags.set(&key, tag);
        }
        Ok(value)
    }

    async fn read_persisted<T: DeserializeOwned>(&self, key: &str) -> FetchResult<T> {
        match self.writer.read(key).await? {
            Some(bytes) => decode(key, &bytes),
            None => {
                warn!(key, "304 received but nothing is stored");
                Err(FetchError::StaleCacheMiss {
                    key: key.to_owned(),
                })
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &Bytes) -> FetchResult<T> {
    serde_json::from_slice(bytes).map_err(|e| FetchError::decode(key, e))
}

/// Assembles a [`Repository`] from a [`Config`] and optional collaborators.
///
/// Anything not supplied falls back to the built-in implementation:
/// [`HttpTransport`], [`MemoryStore`] and [`MemoryTagStore`].
pub struct RepositoryBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn PersistentStore>>,
    tags: Option<Arc<dyn TagStore>>,
}

impl RepositoryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            tags: None,
        }
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: Arc<dyn TagStore>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Validates the configuration and wires the subsystems together.
    pub fn build(self) -> Result<Repository, ConfigError> {
        let config = self.config;
        config.validate()?;
        let base_url = config.base_url()?;

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new().timeout(config.request_timeout()))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let tags = self.tags.unwrap_or_else(|| Arc::new(MemoryTagStore::new()));

        let cache = match config.cache_capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => DedupCache::with_capacity(config.default_ttl(), capacity),
            None => DedupCache::new(config.default_ttl()),
        };
        let write_capacity = NonZeroUsize::new(config.write_capacity).ok_or(ConfigError::Invalid {
            field: "write_capacity",
            reason: "must be at least 1",
        })?;
        let writer = WriteCoordinator::with_capacity(store, write_capacity);
        let executor = BoundedExecutor::new(config.max_concurrency)
            .with_rate_limit(config.rate_limit_delay());

        info!(
            base_url = %base_url,
            ttl = ?config.default_ttl(),
            max_concurrency = config.max_concurrency,
            "repository ready"
        );

        Ok(Repository {
            base_url,
            transport,
            cache,
            writer,
            tags,
            executor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;
    use crate::store::StorageError;
    use crate::transport::TransportError;
    use futures::future::BoxFuture;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Page {
        title: String,
    }

    /// Serves queued responses per URL path and records what it was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        routes: Mutex<HashMap<String, VecDeque<Response>>>,
        seen: Mutex<Vec<(String, Option<String>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn reply(&self, path: &str, response: Response) {
            self.routes
                .lock()
                .unwrap()
                .entry(path.to_owned())
                .or_default()
                .push_back(response);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_etag(&self) -> Option<String> {
            self.seen.lock().unwrap().last().and_then(|(_, tag)| tag.clone())
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let path = request.url().path().to_owned();
                let tag = request.headers().get(IF_NONE_MATCH).map(str::to_owned);
                self.seen.lock().unwrap().push((path.clone(), tag));
                let next = self
                    .routes
                    .lock()
                    .unwrap()
                    .get_mut(&path)
                    .and_then(VecDeque::pop_front);
                Ok(next.unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND)))
            })
        }
    }

    /// Accepts reads but fails every write.
    struct ReadOnlyStore;

    impl PersistentStore for ReadOnlyStore {
        fn read<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
            Box::pin(async { Ok(None) })
        }

        fn write<'a>(
            &'a self,
            key: &'a str,
            _payload: Bytes,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                Err(StorageError::Io {
                    op: "write",
                    key: key.to_owned(),
                    message: "read-only filesystem".to_owned(),
                })
            })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn ok(etag: &str, body: &'static str) -> Response {
        Response::new(StatusCode::OK).with_etag(etag).body(body)
    }

    struct Fixture {
        repository: Repository,
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryStore>,
        tags: Arc<MemoryTagStore>,
    }

    /// Zero TTL so that every fetch reaches the transport.
    fn fixture() -> Fixture {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemoryStore::new());
        let tags = Arc::new(MemoryTagStore::new());
        let config = Config::default()
            .with_base_url("http://swapi.test/api/")
            .with_default_ttl(Duration::ZERO);
        let repository = Repository::builder(config)
            .transport(transport.clone())
            .store(store.clone())
            .tags(tags.clone())
            .build()
            .unwrap();
        Fixture {
            repository,
            transport,
            store,
            tags,
        }
    }

    #[tokio::test]
    async fn first_fetch_persists_payload_then_tag() {
        let f = fixture();
        f.transport.reply("/api/", ok("v1", r#"{"title":"Home"}"#));

        let page: Page = f.repository.fetch_root().await.unwrap();

        assert_eq!(page.title, "Home");
        assert_eq!(f.tags.get(ROOT_KEY).as_deref(), Some("v1"));
        let stored = f.store.read(ROOT_KEY).await.unwrap().unwrap();
        assert_eq!(stored, Bytes::from_static(br#"{"title":"Home"}"#));
        assert_eq!(f.transport.last_etag(), None);
    }

    #[tokio::test]
    async fn not_modified_serves_the_persisted_copy() {
        let f = fixture();
        f.transport.reply("/api/", ok("v1", r#"{"title":"Home"}"#));
        f.transport
            .reply("/api/", Response::new(StatusCode::NOT_MODIFIED));

        let first: Page = f.repository.fetch_root().await.unwrap();
        let second: Page = f.repository.fetch_root().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.transport.calls(), 2);
        assert_eq!(f.transport.last_etag().as_deref(), Some("v1"));
        assert_eq!(f.store.write_count(), 1);
        assert_eq!(f.tags.get(ROOT_KEY).as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn changed_resource_replaces_payload_and_tag() {
        let f = fixture();
        f.transport
            .reply("/api/people/1/", ok("a", r#"{"title":"Luke"}"#));
        f.transport
            .reply("/api/people/1/", ok("b", r#"{"title":"Leia"}"#));

        let _: Page = f.repository.fetch_resource("people/1/").await.unwrap();
        let page: Page = f.repository.fetch_resource("people/1/").await.unwrap();

        assert_eq!(page.title, "Leia");
        assert_eq!(f.transport.last_etag().as_deref(), Some("a"));
        assert_eq!(f.tags.get("1.json").as_deref(), Some("b"));
        assert_eq!(
            f.store.read("1.json").await.unwrap().unwrap(),
            Bytes::from_static(br#"{"title":"Leia"}"#)
        );
    }

    #[tokio::test]
    async fn decode_failure_leaves_tag_and_payload_alone() {
        let f = fixture();
        f.transport.reply("/api/", ok("v1", r#"{"title":"Home"}"#));
        f.transport.reply("/api/", ok("v2", "<html>oops</html>"));

        let _: Page = f.repository.fetch_root().await.unwrap();
        let err = f.repository.fetch_root::<Page>().await.unwrap_err();

        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(f.tags.get(ROOT_KEY).as_deref(), Some("v1"));
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_write_never_stores_the_tag() {
        let transport = Arc::new(ScriptedTransport::default());
        let tags = Arc::new(MemoryTagStore::new());
        transport.reply("/", ok("v1", r#"{"title":"Home"}"#));
        let repository = Repository::builder(Config::default())
            .transport(transport.clone())
            .store(Arc::new(ReadOnlyStore))
            .tags(tags.clone())
            .build()
            .unwrap();

        let err = repository.fetch_root::<Page>().await.unwrap_err();

        assert!(matches!(err, FetchError::Storage(_)));
        assert_eq!(tags.get(ROOT_KEY), None);
    }

    #[tokio::test]
    async fn not_modified_without_local_copy_is_a_stale_miss() {
        let f = fixture();
        f.tags.set(ROOT_KEY, "v1");
        f.transport
            .reply("/api/", Response::new(StatusCode::NOT_MODIFIED));

        let err = f.repository.fetch_root::<Page>().await.unwrap_err();

        assert!(matches!(err, FetchError::StaleCacheMiss { ref key } if key == ROOT_KEY));
        assert_eq!(f.transport.last_etag().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn error_statuses_are_not_cached() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("/", Response::new(StatusCode::SERVICE_UNAVAILABLE));
        transport.reply("/", ok("v1", r#"{"title":"Home"}"#));
        let repository = Repository::builder(Config::default())
            .transport(transport.clone())
            .build()
            .unwrap();

        let err = repository.fetch_root::<Page>().await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));

        let page: Page = repository.fetch_root().await.unwrap();
        assert_eq!(page.title, "Home");
        assert_eq!(transport.calls(), 2);

        // Default TTL: now served from memory.
        let _: Page = repository.fetch_root().await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn fetch_many_reports_each_id() {
        let f = fixture();
        f.transport
            .reply("/api/people/1/", ok("a", r#"{"title":"Luke"}"#));
        f.transport
            .reply("/api/people/2/", ok("b", r#"{"title":"Leia"}"#));

        let results: HashMap<String, FetchResult<Page>> = f
            .repository
            .fetch_many(["people/1/", "people/2/", "people/3/"])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["people/1/"].as_ref().unwrap().title, "Luke");
        assert_eq!(results["people/2/"].as_ref().unwrap().title, "Leia");
        assert!(matches!(
            results["people/3/"],
            Err(FetchError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            })
        ));
        assert_eq!(f.tags.get("2.json").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn invalidate_forces_an_unconditional_fetch() {
        let f = fixture();
        f.transport
            .reply("/api/films/", ok("v1", r#"{"title":"Films"}"#));
        f.transport
            .reply("/api/films/", ok("v2", r#"{"title":"Films"}"#));

        let _: Page = f.repository.fetch_resource("films/").await.unwrap();
        f.repository.invalidate("films/").await.unwrap();

        assert_eq!(f.tags.get("films.json"), None);
        assert!(f.store.read("films.json").await.unwrap().is_none());

        let _: Page = f.repository.fetch_resource("films/").await.unwrap();
        assert_eq!(f.transport.last_etag(), None);
        assert_eq!(f.tags.get("films.json").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn rejects_ids_without_a_key() {
        let f = fixture();
        let err = f
            .repository
            .fetch_resource::<Page>("http://other.test/")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidResource { .. }));
        assert_eq!(f.transport.calls(), 0);
    }

    /// Holds every write until the gate is released.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        gate: Notify,
        started: AtomicUsize,
    }

    impl PersistentStore for GatedStore {
        fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
            self.inner.read(key)
        }

        fn write<'a>(
            &'a self,
            key: &'a str,
            payload: Bytes,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                self.gate.notified().await;
                self.inner.write(key, payload).await
            })
        }

        fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
            self.inner.delete(key)
        }
    }

    struct GatedFixture {
        repository: Arc<Repository>,
        transport: Arc<ScriptedTransport>,
        store: Arc<GatedStore>,
        tags: Arc<MemoryTagStore>,
    }

    fn gated_fixture() -> GatedFixture {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(GatedStore::default());
        let tags = Arc::new(MemoryTagStore::new());
        let config = Config::default()
            .with_base_url("http://swapi.test/api/")
            .with_default_ttl(Duration::ZERO);
        let repository = Repository::builder(config)
            .transport(transport.clone())
            .store(store.clone())
            .tags(tags.clone())
            .build()
            .unwrap();
        GatedFixture {
            repository: Arc::new(repository),
            transport,
            store,
            tags,
        }
    }

    async fn wait_for_writes(store: &GatedStore, n: usize) {
        while store.started.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_fetch(
        repository: &Arc<Repository>,
        id: &'static str,
    ) -> tokio::task::JoinHandle<FetchResult<Page>> {
        let repository = Arc::clone(repository);
        tokio::spawn(async move { repository.fetch_resource::<Page>(id).await })
    }

    #[tokio::test]
    async fn joined_write_of_a_newer_body_keeps_the_older_tag() {
        let f = gated_fixture();
        f.transport
            .reply("/api/people/1/", ok("v1", r#"{"title":"Luke"}"#));
        f.transport
            .reply("/api/people/1/", ok("v2", r#"{"title":"Leia"}"#));

        let first = spawn_fetch(&f.repository, "people/1/");
        wait_for_writes(&f.store, 1).await;
        let second = spawn_fetch(&f.repository, "people/1/");
        while f.transport.calls() < 2 {
            tokio::task::yield_now().await;
        }
        // let the second fetch reach the writer and join the pending write
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        f.store.gate.notify_one();

        assert_eq!(first.await.unwrap().unwrap().title, "Luke");
        assert_eq!(second.await.unwrap().unwrap().title, "Leia");
        assert_eq!(f.store.started.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.store.inner.read("1.json").await.unwrap(),
            Some(Bytes::from_static(br#"{"title":"Luke"}"#))
        );
        assert_eq!(f.tags.get("1.json").as_deref(), Some("v1"));

        // Revalidating with v1 brings the newer body back and stores it.
        f.transport
            .reply("/api/people/1/", ok("v2", r#"{"title":"Leia"}"#));
        f.store.gate.notify_one();
        let third: Page = f.repository.fetch_resource("people/1/").await.unwrap();

        assert_eq!(third.title, "Leia");
        assert_eq!(f.transport.last_etag().as_deref(), Some("v1"));
        assert_eq!(f.tags.get("1.json").as_deref(), Some("v2"));
        assert_eq!(
            f.store.inner.read("1.json").await.unwrap(),
            Some(Bytes::from_static(br#"{"title":"Leia"}"#))
        );
    }

    #[tokio::test]
    async fn cancel_all_mid_write_changes_nothing() {
        let f = gated_fixture();
        let old = Bytes::from_static(br#"{"title":"Old"}"#);
        f.store.inner.write(ROOT_KEY, old.clone()).await.unwrap();
        f.tags.set(ROOT_KEY, "v0");
        f.transport.reply("/api/", ok("v1", r#"{"title":"Home"}"#));

        let fetch = {
            let repository = Arc::clone(&f.repository);
            tokio::spawn(async move { repository.fetch_root::<Page>().await })
        };
        wait_for_writes(&f.store, 1).await;
        f.repository.cancel_all();

        let err = fetch.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.repository.writer().pending_len(), 0);
        assert_eq!(f.tags.get(ROOT_KEY).as_deref(), Some("v0"));
        assert_eq!(f.store.inner.read(ROOT_KEY).await.unwrap(), Some(old));
        assert_eq!(f.store.inner.write_count(), 1);
    }
}
