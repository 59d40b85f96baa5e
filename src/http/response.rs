//! HTTP/1.1 response parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{ETAG, Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A response received from a [`Transport`].
///
/// [`Transport`]: crate::transport::Transport
///
/// # Examples
///
/// ```
/// use rfetch::http::{Response, StatusCode};
///
/// let raw = b"HTTP/1.1 200 OK\r\nETag: \"v1\"\r\nContent-Length: 2\r\n\r\n{}";
/// let (response, offset) = Response::parse_head(raw).unwrap();
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.etag(), Some("\"v1\""));
/// assert_eq!(&raw[offset..], b"{}");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Creates a response with the given status, no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Sets a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the `etag` header.
    #[must_use]
    pub fn with_etag(self, etag: impl Into<String>) -> Self {
        self.header(ETAG, etag)
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parses the status line and headers from `buf`.
    ///
    /// Returns a body-less `Response` and the offset at which the body begins.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — more data is needed to complete the headers.
    /// - [`ResponseError::Parse`] — the data is malformed.
    /// - [`ResponseError::MissingField`] — the status code is absent.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.set(header.name, value);
            }
        }

        Ok((
            Self {
                status: StatusCode::from_u16(code),
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body. Cloning the returned [`Bytes`] is cheap.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the entity tag, if the server sent one.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG)
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the body is sent with chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_not_modified() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\n\r\n";
        let (resp, offset) = Response::parse_head(raw).unwrap();
        assert!(resp.status().is_not_modified());
        assert_eq!(resp.etag(), Some("\"v1\""));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn incomplete_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Le";
        assert!(matches!(
            Response::parse_head(raw),
            Err(ResponseError::Incomplete)
        ));
    }

    #[test]
    fn content_length_and_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\n";
        let (resp, _) = Response::parse_head(raw).unwrap();
        assert_eq!(resp.content_length(), Some(12));
        assert!(!resp.is_chunked());

        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let (resp, _) = Response::parse_head(raw).unwrap();
        assert!(resp.is_chunked());
    }

    #[test]
    fn builder() {
        let resp = Response::new(StatusCode::OK)
            .with_etag("\"v2\"")
            .body(&b"{\"title\":\"Home\"}"[..]);
        assert_eq!(resp.etag(), Some("\"v2\""));
        assert_eq!(resp.body_bytes().len(), 16);
    }
}
