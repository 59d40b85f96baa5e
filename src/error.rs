//! Crate-level error taxonomy.
//!
//! Every error is `Clone`: a single in-flight transport call or physical
//! write hands the same outcome to every caller that joined it.

use std::sync::Arc;

use thiserror::Error;

use crate::http::StatusCode;
use crate::store::StorageError;
use crate::transport::TransportError;

/// Errors produced by the fetch core.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network, timeout or protocol failure. Never retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a status that is neither 2xx nor 304.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: StatusCode },

    /// The payload could not be decoded; no cache or tag state was touched.
    #[error("failed to decode payload for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The persistent store failed; the paired tag update was skipped.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The server said "not modified" but nothing is stored locally.
    #[error("server reported {key} unchanged but no local copy exists")]
    StaleCacheMiss { key: String },

    /// The resource identifier cannot be resolved to a URL or cache key.
    #[error("invalid resource {id}: {reason}")]
    InvalidResource { id: String, reason: String },

    /// A background load or write task panicked.
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// The operation was aborted by `cancel_all`.
    #[error("operation cancelled")]
    Cancelled,
}

impl FetchError {
    pub(crate) fn decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            key: key.into(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` if this error came from `cancel_all`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
