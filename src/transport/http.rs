//! Plain HTTP/1.1 transport using Tokio.
//!
//! Opens one TCP connection per request (`Connection: close`), writes the
//! serialized GET, and reads until the body is complete according to
//! `Content-Length`, chunked coding, or end of stream.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::http::{Request, Response, ResponseError};

/// Maximum size of a complete HTTP response we will buffer (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Default whole-exchange timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`Transport`] speaking HTTP/1.1 over plain TCP.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rfetch::http::Request;
/// use rfetch::transport::{HttpTransport, Transport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = HttpTransport::new().timeout(Duration::from_secs(5));
///     let response = transport
///         .get(Request::get("http://127.0.0.1:8080/api/".parse()?))
///         .await?;
///     println!("{}", response.status());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    max_response_size: usize,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Sets the timeout covering connect, write and the full response read.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps the buffered response size (head plus body).
    #[must_use]
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    async fn exchange(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.url().clone();
        if url.scheme() != "http" {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        let host = url.host_str().ok_or_else(|| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_owned(),
        })?;
        let port = url.port_or_known_default().unwrap_or(80);

        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::Connect {
                addr: format!("{host}:{port}"),
                message: e.to_string(),
            })?;

        debug!(url = %url, "request sent");
        stream.write_all(&request.into_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        let mut head: Option<(Response, usize)> = None;

        loop {
            let eof = stream.read_buf(&mut buf).await? == 0;

            if buf.len() > self.max_response_size {
                warn!(url = %url, size = buf.len(), "response too large");
                return Err(TransportError::Protocol(format!(
                    "response exceeds {} bytes",
                    self.max_response_size
                )));
            }

            if head.is_none() {
                match Response::parse_head(&buf) {
                    Ok(pair) => head = Some(pair),
                    Err(ResponseError::Incomplete) if !eof => continue,
                    Err(e) => return Err(TransportError::Protocol(e.to_string())),
                }
            }

            let Some((response, offset)) = head.as_ref() else {
                continue;
            };
            match complete_body(response, &buf[*offset..], eof)? {
                Some(body) => {
                    let Some((response, _)) = head.take() else {
                        continue;
                    };
                    debug!(url = %url, status = %response.status(), bytes = body.len(), "response received");
                    return Ok(response.body(body));
                }
                None if eof => {
                    return Err(TransportError::Protocol(
                        "connection closed before body was complete".to_owned(),
                    ));
                }
                None => continue,
            }
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.exchange(request))
                .await
                .map_err(|_| TransportError::Timeout(self.timeout))?
        })
    }
}

/// Returns the body if `payload` holds all of it, or `None` if more data is needed.
fn complete_body(
    response: &Response,
    payload: &[u8],
    eof: bool,
) -> Result<Option<Bytes>, TransportError> {
    let status = response.status().as_u16();
    if status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(Some(Bytes::new()));
    }
    if response.is_chunked() {
        return decode_chunked(payload).map(|body| body.map(Bytes::from));
    }
    match response.content_length() {
        Some(len) if payload.len() >= len => Ok(Some(Bytes::copy_from_slice(&payload[..len]))),
        Some(_) => Ok(None),
        None if eof => Ok(Some(Bytes::copy_from_slice(payload))),
        None => Ok(None),
    }
}

/// Decodes a chunked body. Trailers after the last chunk are ignored.
fn decode_chunked(mut buf: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
    let mut body = Vec::new();
    loop {
        let (offset, size) = match httparse::parse_chunk_size(buf) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(TransportError::Protocol("invalid chunk size".to_owned())),
        };
        let size = usize::try_from(size)
            .map_err(|_| TransportError::Protocol("chunk too large".to_owned()))?;
        buf = &buf[offset..];
        if size == 0 {
            return Ok(Some(body));
        }
        let end = size
            .checked_add(2)
            .ok_or_else(|| TransportError::Protocol("chunk too large".to_owned()))?;
        if buf.len() < end {
            return Ok(None);
        }
        if &buf[size..end] != b"\r\n" {
            return Err(TransportError::Protocol(
                "chunk not terminated by CRLF".to_owned(),
            ));
        }
        body.extend_from_slice(&buf[..size]);
        buf = &buf[end..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;
    use tokio::net::TcpListener;

    #[test]
    fn chunked_body() {
        let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw).unwrap(), Some(b"Wikipedia".to_vec()));
        assert_eq!(decode_chunked(b"4\r\nWi").unwrap(), None);
        assert!(decode_chunked(b"zz\r\n").is_err());
    }

    #[test]
    fn malformed_chunks_are_protocol_errors() {
        let huge = decode_chunked(b"ffffffffffffffff\r\nabc");
        assert!(matches!(huge, Err(TransportError::Protocol(_))));

        let unterminated = decode_chunked(b"4\r\nWikiXX5\r\npedia\r\n0\r\n\r\n");
        assert!(matches!(unterminated, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn not_modified_has_no_body() {
        let (resp, _) = Response::parse_head(b"HTTP/1.1 304 Not Modified\r\n\r\n").unwrap();
        assert_eq!(complete_body(&resp, b"", false).unwrap(), Some(Bytes::new()));
    }

    async fn serve_once(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
        });
        format!("http://{addr}/api/")
    }

    #[tokio::test]
    async fn get_with_content_length() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nETag: \"v1\"\r\nContent-Length: 16\r\n\r\n{\"title\":\"Home\"}").await;
        let resp = HttpTransport::new()
            .get(Request::get(url.parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.etag(), Some("\"v1\""));
        assert_eq!(resp.body_bytes().as_ref(), b"{\"title\":\"Home\"}");
    }

    #[tokio::test]
    async fn get_until_eof() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\n\r\n[]").await;
        let resp = HttpTransport::new()
            .get(Request::get(url.parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.body_bytes().as_ref(), b"[]");
    }

    #[tokio::test]
    async fn rejects_https() {
        let err = HttpTransport::new()
            .get(Request::get("https://example.com/".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }
}
