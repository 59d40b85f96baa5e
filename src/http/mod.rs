//! HTTP/1.1 client-side protocol types.
//!
//! This module provides the primitives the fetch core speaks in:
//! [`StatusCode`], [`Headers`], the outgoing [`Request`] and the parsed
//! [`Response`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::{Response, ResponseError};

/// Conditional request header carrying a previously seen entity tag.
pub const IF_NONE_MATCH: &str = "if-none-match";

/// Response header carrying the server-issued entity tag.
pub const ETAG: &str = "etag";

/// An HTTP response status code.
///
/// Unlike a server, a client has to accept whatever code the peer sends, so
/// the status is an open newtype with named constants for the codes the
/// fetch core branches on.
///
/// # Examples
///
/// ```
/// use rfetch::http::StatusCode;
///
/// let status = StatusCode::NOT_MODIFIED;
/// assert_eq!(status.as_u16(), 304);
/// assert_eq!(status.canonical_reason(), "Not Modified");
/// assert!(!status.is_success());
/// assert!(StatusCode::from_u16(299).is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const NOT_MODIFIED: Self = Self(304);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);

    /// Wraps a raw numeric status code.
    pub const fn from_u16(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric status code as a `u16`.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` for any 2xx code.
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns `true` for `304 Not Modified`.
    pub const fn is_not_modified(self) -> bool {
        self.0 == 304
    }

    /// Returns the canonical reason phrase, or `""` for codes we don't name.
    pub fn canonical_reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            410 => "Gone",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = self.canonical_reason();
        if reason.is_empty() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "{} {}", self.0, reason)
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}
