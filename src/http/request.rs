//! Outgoing HTTP/1.1 GET request.
//!
//! Provides a small builder for the only request shape the fetch core
//! issues, and its HTTP/1.1 wire serialization for [`HttpTransport`].
//!
//! [`HttpTransport`]: crate::transport::HttpTransport

use bytes::{BufMut, BytesMut};
use url::Url;

use super::Headers;

/// An HTTP GET request, ready to be handed to a [`Transport`].
///
/// [`Transport`]: crate::transport::Transport
///
/// # Examples
///
/// ```
/// use rfetch::http::{IF_NONE_MATCH, Request};
///
/// let url = "http://example.com/api/people/?page=2".parse().unwrap();
/// let request = Request::get(url).header(IF_NONE_MATCH, "\"v1\"");
///
/// let bytes = request.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("GET /api/people/?page=2 HTTP/1.1\r\n"));
/// assert!(text.contains("Host: example.com\r\n"));
/// assert!(text.contains("if-none-match: \"v1\"\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    headers: Headers,
}

impl Request {
    /// Creates a GET request for `url` with no headers.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Headers::new(),
        }
    }

    /// Sets a request header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replaces the whole header map.
    #[must_use]
    pub fn headers_from(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the origin-form request target (`/path?query`).
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_owned(),
        }
    }

    /// Returns the `Host` header value, including a non-default port.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// Serializes the request using HTTP/1.1 wire format.
    ///
    /// Automatically adds `Host`, `Accept: application/json` (unless set) and
    /// `Connection: close`; the transport opens one connection per request.
    pub fn into_bytes(self) -> BytesMut {
        let estimated_size = 128 + self.headers.len() * 64;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("GET {} HTTP/1.1\r\n", self.target()).as_bytes());
        buf.put(format!("Host: {}\r\n", self.host()).as_bytes());

        if !self.headers.contains("accept") {
            buf.put(&b"Accept: application/json\r\n"[..]);
        }
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(&b"Connection: close\r\n\r\n"[..]);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn root_target() {
        let req = Request::get("http://localhost:8080".parse().unwrap());
        assert_eq!(req.target(), "/");
        assert_eq!(req.host(), "localhost:8080");
    }

    #[test]
    fn custom_accept_is_not_duplicated() {
        let req = Request::get("http://example.com/a".parse().unwrap())
            .header("Accept", "text/plain");
        let s = to_string(req.into_bytes());
        assert!(s.contains("Accept: text/plain\r\n"));
        assert!(!s.contains("application/json"));
    }

    #[test]
    fn ends_with_blank_line() {
        let req = Request::get("http://example.com/a".parse().unwrap());
        let s = to_string(req.into_bytes());
        assert!(s.ends_with("Connection: close\r\n\r\n"));
    }
}
