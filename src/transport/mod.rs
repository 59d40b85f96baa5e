//! Transport seam: a single HTTP GET.
//!
//! The fetch core never talks to the network directly; everything goes
//! through a [`Transport`]. [`HttpTransport`] is a minimal HTTP/1.1
//! implementation over a Tokio `TcpStream`; applications with TLS or proxy
//! needs plug in their own client behind the same trait.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::http::{Request, Response};

pub mod http;

pub use http::HttpTransport;

/// Connectivity and protocol failures. Never retried by the fetch core.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Performs a single HTTP GET.
///
/// # Contract
///
/// - Any status code the server sends is a successful transport outcome;
///   only connectivity and protocol failures are errors.
/// - Implementations **must** be `Send + Sync`; the fetch core shares one
///   transport across spawned Tokio tasks.
pub trait Transport: Send + Sync {
    fn get(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>>;
}
