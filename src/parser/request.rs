//! HTTP request representation and incremental parsing.
//!
//! The parser is a state machine driven by whatever bytes happen to be
//! buffered: it never blocks, consuming what it can and reporting that it
//! needs more data otherwise. [`RequestParser::read_request`] wraps the
//! machine in an async read loop over a transport; [`parse_request`] feeds
//! it a complete byte slice in one shot.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::parser::chunked::ChunkParser;
use crate::parser::error::Error;
use crate::parser::headers::Headers;
use crate::parser::method::Method;
use crate::parser::version::HttpVersion;

/// Size cap on the request line.
pub const MAX_REQUEST_LINE: usize = 8192;

/// Size cap on the request target.
pub const MAX_URI_LENGTH: usize = 8192;

/// Default cap on cumulative header bytes.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// Default cap on the request body.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 << 20;

const READ_CHUNK: usize = 4096;

/// A fully parsed HTTP request.
///
/// Values of this type are only ever observable once the parser has seen
/// the complete message; a partially-parsed request is never exposed.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target as it appeared on the wire
    pub path: String,
    /// The HTTP version
    pub version: HttpVersion,
    /// The HTTP headers
    pub headers: Headers,
    /// The request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Get the first value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Check if a header exists.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// The parsed `Content-Length`, if the request carried one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    /// True if the body used chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        self.headers.is_chunked()
    }

    pub fn is_http10(&self) -> bool {
        self.version == HttpVersion::Http10
    }

    /// True if the `Connection` header carries the given token
    /// (comma-separated list, case-insensitive).
    fn connection_has_token(&self, token: &str) -> bool {
        self.headers.get_all("connection").iter().any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// True if the client asked to reuse the connection.
    pub fn wants_keep_alive(&self) -> bool {
        self.connection_has_token("keep-alive")
    }

    /// True if the client asked to close the connection.
    pub fn wants_close(&self) -> bool {
        self.connection_has_token("close")
    }

    /// True if the client sent `Expect: 100-continue`.
    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
    }

    /// Check if the request has a JSON body.
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.starts_with("application/json"))
    }

    /// Parse the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if !self.is_json() {
            return Err(Error::MissingHeader(
                "Content-Type: application/json".to_string(),
            ));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Parser states. Transitions are monotonic until the request is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body,
    Done,
}

/// Incremental request parser.
///
/// One parser produces one request; the connection loop creates a fresh
/// parser per iteration and threads its own accumulation buffer through so
/// bytes over-read past the end of one request are kept for the next.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    max_header_bytes: usize,
    max_body_bytes: u64,

    method: Option<Method>,
    path: String,
    version: Option<HttpVersion>,
    headers: Headers,
    body: Vec<u8>,
    chunk_parser: ChunkParser,
}

impl RequestParser {
    pub fn new(max_header_bytes: usize, max_body_bytes: u64) -> Self {
        Self {
            state: State::RequestLine,
            max_header_bytes,
            max_body_bytes,
            method: None,
            path: String::new(),
            version: None,
            headers: Headers::new(),
            body: Vec::new(),
            chunk_parser: ChunkParser::new(),
        }
    }

    /// True if no byte of the current request has been consumed yet.
    pub fn at_start(&self) -> bool {
        self.state == State::RequestLine && self.method.is_none()
    }

    /// Reads one complete request from `reader`.
    ///
    /// `buf` is the caller-owned accumulation buffer; leftover bytes from a
    /// previous request are consumed first, and bytes past the end of this
    /// request are left in it. Returns `Ok(None)` when the peer closed the
    /// connection cleanly before sending anything.
    pub async fn read_request<R>(
        &mut self,
        reader: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<Option<HttpRequest>, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut read_buf = [0u8; READ_CHUNK];

        while self.state != State::Done {
            if !buf.is_empty() {
                let consumed = self.advance(buf)?;
                if consumed > 0 {
                    buf.drain(..consumed);
                    continue;
                }
                if self.state == State::Done {
                    break;
                }
            }

            // A runaway peer must not grow the buffer past the header
            // limits while we are still before the body.
            if self.state != State::Body
                && buf.len() > self.max_header_bytes + MAX_REQUEST_LINE + 4
            {
                return Err(Error::HeadersTooLarge);
            }

            let n = reader.read(&mut read_buf).await?;
            if n == 0 {
                if self.at_start() && buf.is_empty() {
                    // Peer closed a persistent connection between requests.
                    return Ok(None);
                }
                return Err(Error::UnexpectedEof);
            }
            buf.extend_from_slice(&read_buf[..n]);
        }

        self.take_request().map(Some)
    }

    /// Applies the active substate to `data`, returning bytes consumed.
    /// Consuming nothing without erroring means more data is needed.
    fn advance(&mut self, data: &[u8]) -> Result<usize, Error> {
        match self.state {
            State::RequestLine => self.parse_request_line(data),
            State::Headers => self.parse_headers(data),
            State::Body => self.parse_body(data),
            State::Done => Ok(0),
        }
    }

    fn parse_request_line(&mut self, data: &[u8]) -> Result<usize, Error> {
        let Some(idx) = crate::parser::headers::find_crlf(data) else {
            if data.len() > MAX_REQUEST_LINE {
                return Err(Error::RequestLineTooLarge);
            }
            return Ok(0);
        };

        if idx > MAX_REQUEST_LINE {
            return Err(Error::RequestLineTooLarge);
        }

        let line = std::str::from_utf8(&data[..idx])
            .map_err(|_| Error::MalformedRequestLine("invalid UTF-8".to_string()))?;

        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            return Err(Error::MalformedRequestLine(line.to_string()));
        }

        let method = Method::from_str(parts[0])?;
        let path = parts[1];
        let version = HttpVersion::from_str(parts[2])?;

        if !is_valid_target(path) {
            return Err(Error::InvalidPath);
        }
        if path.len() > MAX_URI_LENGTH {
            return Err(Error::UriTooLong);
        }

        self.method = Some(method);
        self.path = path.to_string();
        self.version = Some(version);
        self.state = State::Headers;

        Ok(idx + 2)
    }

    fn parse_headers(&mut self, data: &[u8]) -> Result<usize, Error> {
        let (consumed, done) = self.headers.parse(data, self.max_header_bytes)?;
        if !done {
            return Ok(consumed);
        }

        if self.headers.is_chunked() {
            self.state = State::Body;
            return Ok(consumed);
        }

        match self.headers.content_length() {
            Some(cl) if cl > 0 => {
                if cl > self.max_body_bytes {
                    return Err(Error::BodyTooLarge);
                }
                self.body.reserve(cl.min(READ_CHUNK as u64) as usize);
                self.state = State::Body;
            }
            _ => self.state = State::Done,
        }

        Ok(consumed)
    }

    fn parse_body(&mut self, data: &[u8]) -> Result<usize, Error> {
        if self.headers.is_chunked() {
            let (consumed, done) =
                self.chunk_parser
                    .parse(data, &mut self.body, self.max_body_bytes)?;
            if done {
                self.state = State::Done;
            }
            return Ok(consumed);
        }

        let cl = self.headers.content_length().unwrap_or(0) as usize;
        let remaining = cl.saturating_sub(self.body.len());
        if remaining == 0 {
            self.state = State::Done;
            return Ok(0);
        }

        let to_read = remaining.min(data.len());
        self.body.extend_from_slice(&data[..to_read]);

        if self.body.len() == cl {
            self.state = State::Done;
        }

        Ok(to_read)
    }

    /// Seals the accumulated pieces into a request. Only valid in `Done`.
    fn take_request(&mut self) -> Result<HttpRequest, Error> {
        match (self.method.take(), self.version.take()) {
            (Some(method), Some(version)) if self.state == State::Done => Ok(HttpRequest {
                method,
                path: std::mem::take(&mut self.path),
                version,
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
            }),
            _ => Err(Error::UnexpectedEof),
        }
    }
}

/// Origin-form, `*`, or absolute-form request targets are accepted.
fn is_valid_target(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    path.starts_with('/') || path == "*" || path.contains("://")
}

/// Parse a complete HTTP request from a byte slice.
///
/// Convenience entry point for callers that already hold the whole
/// message; parsing semantics are identical to the incremental path.
///
/// # Examples
///
/// ```
/// use wirehttp::parse_request;
///
/// let raw = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
/// let request = parse_request(raw).unwrap();
/// assert_eq!(request.path, "/index.html");
/// assert_eq!(request.header("host"), Some("example.com"));
/// ```
pub fn parse_request(input: &[u8]) -> Result<HttpRequest, Error> {
    let mut parser = RequestParser::new(DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_BODY_BYTES);
    let mut offset = 0;

    while parser.state != State::Done {
        let consumed = parser.advance(&input[offset..])?;
        offset += consumed;
        if consumed == 0 && parser.state != State::Done {
            return Err(Error::UnexpectedEof);
        }
    }

    parser.take_request()
}
