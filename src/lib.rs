//! # rfetch
//!
//! An async conditional-fetch client core for JSON HTTP APIs.
//!
//! Every fetch revalidates with the resource's stored entity tag, collapses
//! concurrent requests for the same URL into one network call, and persists
//! the payload through a write coordinator that merges concurrent writes of
//! the same key. A tag is recorded only after its payload is safely stored.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rfetch::{Config, Repository};
//!
//! #[derive(serde::Deserialize)]
//! struct Person {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default().with_base_url("http://127.0.0.1:8080/api/");
//!     let repository = Repository::builder(config).build()?;
//!
//!     let luke: Person = repository.fetch_resource("people/1/").await?;
//!     println!("{}", luke.name);
//!
//!     // Fetched again with `if-none-match`; a 304 is served from the store.
//!     let again: Person = repository.fetch_resource("people/1/").await?;
//!     assert_eq!(luke.name, again.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`cache`]: TTL cache with in-flight request dedup.
//! - [`executor`]: semaphore-bounded task runner with sliding-window batches.
//! - [`writer`]: per-key write coalescing over a [`store::PersistentStore`].
//! - [`repository`]: the conditional fetch flow tying the three together.
//! - [`transport`], [`http`]: the minimal HTTP/1.1 GET client underneath.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod repository;
pub mod store;
pub mod transport;
pub mod writer;

mod flight;
mod sync;

pub use cache::DedupCache;
pub use config::{Config, ConfigError};
pub use error::{FetchError, FetchResult};
pub use executor::{BoundedExecutor, ExecutorError};
pub use http::{Headers, Request, Response, StatusCode};
pub use repository::{Repository, RepositoryBuilder};
pub use store::{FsStore, MemoryStore, MemoryTagStore, PersistentStore, StorageError, TagStore};
pub use transport::{HttpTransport, Transport, TransportError};
pub use writer::{WriteCoordinator, WriteState};
