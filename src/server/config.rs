//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address to bind to.
    pub addr: SocketAddr,
    /// Max time to read one request, from first byte to complete message.
    pub read_timeout: Duration,
    /// Max time to write one response.
    pub write_timeout: Duration,
    /// Max time a kept-alive connection may sit idle between requests.
    pub idle_timeout: Duration,
    /// Optional wall-clock budget for a whole request, handler included.
    /// The connection closes after the current response when exceeded.
    pub request_timeout: Option<Duration>,
    /// Max cumulative header bytes per request.
    pub max_header_bytes: usize,
    /// Max request body size in bytes.
    pub max_request_body_size: u64,
    /// Max requests served on one connection before it is closed.
    pub max_requests_per_conn: usize,
    /// Max concurrent connections.
    pub max_conns: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            request_timeout: Some(Duration::from_secs(30)),
            max_header_bytes: 1 << 20,
            max_request_body_size: 10 << 20,
            max_requests_per_conn: 1000,
            max_conns: 10_000,
        }
    }
}
