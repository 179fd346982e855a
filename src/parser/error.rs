//! Error types for the HTTP parser.

use thiserror::Error;

/// Errors that can occur while parsing an HTTP request.
///
/// The connection loop maps these onto wire responses: syntax and
/// security violations become `400 Bad Request`, size-limit overflows
/// become `413 Payload Too Large`, and `UnexpectedEof`/`Io` close the
/// connection without a response when nothing can be said.
#[derive(Debug, Error)]
pub enum Error {
    /// The request line does not have the shape `METHOD SP TARGET SP VERSION`.
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The HTTP method is not one of the recognized tokens.
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// The request target is empty or not a recognized form.
    #[error("invalid request path")]
    InvalidPath,

    /// The version token is not `HTTP/1.0` or `HTTP/1.1`.
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    /// A header line is missing its colon, or its name contains whitespace
    /// or is empty.
    #[error("malformed header")]
    MalformedHeader,

    /// A header line began with SP or HTAB. Obsolete line folding is
    /// refused, not unfolded.
    #[error("obsolete line folding not supported")]
    ObsoleteLineFolding,

    /// More than one `Host` header was received.
    #[error("duplicate Host header")]
    DuplicateHost,

    /// More than one `Content-Length` header was received.
    #[error("duplicate Content-Length header")]
    DuplicateContentLength,

    /// Two `Content-Length` headers disagree on the value.
    #[error("conflicting Content-Length values")]
    ConflictingContentLength,

    /// The `Content-Length` value is not a non-negative decimal integer.
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// More than one `Transfer-Encoding` header was received.
    #[error("duplicate Transfer-Encoding header")]
    DuplicateTransferEncoding,

    /// Both `Transfer-Encoding: chunked` and `Content-Length` were present;
    /// RFC 7230 forbids the combination.
    #[error("both Transfer-Encoding and Content-Length present")]
    BothChunkedAndLength,

    /// A header name contains a byte outside the RFC 7230 token set, or a
    /// header value contains NUL, CR, or LF.
    #[error("invalid character in header: {0}")]
    InvalidHeaderChar(char),

    /// The request line exceeds the request-line size limit.
    #[error("request line too large")]
    RequestLineTooLarge,

    /// The request target exceeds the URI length limit.
    #[error("URI too long")]
    UriTooLong,

    /// The cumulative header bytes exceed the configured limit.
    #[error("headers too large")]
    HeadersTooLarge,

    /// More header lines than the parser permits.
    #[error("too many header lines")]
    TooManyHeaders,

    /// The body exceeds the configured maximum size.
    #[error("request body too large")]
    BodyTooLarge,

    /// A chunk size line is not valid hex, or is negative.
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    /// A single chunk declares more bytes than the per-chunk limit.
    #[error("chunk size too large")]
    ChunkTooLarge,

    /// Chunk framing is broken: missing CRLF after chunk data, oversize
    /// size line, or an oversize or NUL-bearing trailer region.
    #[error("invalid chunk format: {0}")]
    InvalidChunkFormat(String),

    /// The peer closed the transport in the middle of a request.
    #[error("unexpected EOF while parsing request")]
    UnexpectedEof,

    /// The transport read failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required header is missing from the request.
    #[error("required header is missing: {0}")]
    MissingHeader(String),

    /// Error parsing a JSON body.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for limit overflows, which the connection loop answers with
    /// `413 Payload Too Large` instead of `400 Bad Request`.
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            Error::RequestLineTooLarge
                | Error::UriTooLong
                | Error::HeadersTooLarge
                | Error::TooManyHeaders
                | Error::BodyTooLarge
                | Error::ChunkTooLarge
        )
    }
}
