//! HTTP/1.1 request parsing.
//!
//! An incremental, byte-level parser for the HTTP/1.1 wire protocol:
//! request line, headers, fixed-length and chunked bodies. The parser
//! consumes whatever is buffered and reports when it needs more data, so
//! it behaves identically however the input is fragmented.

mod chunked;
mod error;
mod headers;
mod method;
mod request;
mod version;

// Re-export public items
pub use chunked::{ChunkParser, MAX_CHUNK_SIZE, MAX_CHUNK_SIZE_LINE};
pub use error::Error;
pub use headers::{Headers, MAX_HEADER_LINES};
pub use method::Method;
pub use request::{
    HttpRequest, RequestParser, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES,
    MAX_REQUEST_LINE, MAX_URI_LENGTH,
};
pub use version::HttpVersion;

// Re-export the parse_request function
pub use request::parse_request;
