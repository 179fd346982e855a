//! An embeddable HTTP/1.1 server engine.
//!
//! `wirehttp` implements the HTTP/1.1 wire protocol from first principles
//! against raw byte streams: an incremental request parser that survives
//! arbitrary read fragmentation, a phase-enforced response serializer, and
//! a per-connection loop with keep-alive, timeout, size-limit, and
//! graceful-shutdown semantics.
//!
//! # Features
//!
//! - Incremental parsing of request line, headers, fixed-length and
//!   chunked bodies, with strict RFC 7230 validation
//! - Defense against resource exhaustion: request-line, URI, header, body,
//!   and chunk size limits, plus a per-connection request cap
//! - A response writer that enforces status → headers → body ordering and
//!   reports its framing to the connection loop
//! - Keep-alive with correct HTTP/1.0 and HTTP/1.1 semantics, decided by a
//!   single policy function
//! - Cooperative graceful shutdown: in-flight responses complete with
//!   `Connection: close` before their connections exit
//! - JSON request and response bodies via serde
//!
//! # Examples
//!
//! ## Parsing a request
//!
//! ```
//! use wirehttp::{parse_request, Method, HttpVersion};
//!
//! let raw = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
//!
//! let request = parse_request(raw).unwrap();
//! assert_eq!(request.method, Method::GET);
//! assert_eq!(request.path, "/index.html");
//! assert_eq!(request.version, HttpVersion::Http11);
//! assert_eq!(request.header("host"), Some("example.com"));
//! ```
//!
//! ## Serving
//!
//! ```no_run
//! use wirehttp::{
//!     Context, Handler, HandlerFuture, HttpServer, ServerConfig, StatusCode,
//! };
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
//!         Box::pin(async move { ctx.text(StatusCode::Ok, "Hello, World!").await })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = HttpServer::new(ServerConfig::default(), Hello);
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

// Export the parser module
pub mod parser;

// Export the server module
pub mod server;

// Re-export commonly used items for convenience
pub use parser::{
    parse_request, Error as ParserError, Headers, HttpRequest, HttpVersion, Method, RequestParser,
};
pub use server::{
    serve_connection, should_close, ConnOutcome, Context, Error as ServerError, Handler,
    HandlerFn, HandlerFuture, HttpServer, Metrics, ResponseSummary, ResponseWriter, ServerConfig,
    ShutdownSignal, StatusCode,
};
