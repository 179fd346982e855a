//! HTTP/1.1 server engine.
//!
//! The pieces that drive the parser against real connections: the
//! phase-enforced response writer, the keep-alive policy, the
//! per-connection loop, and a tokio acceptor with graceful shutdown.

mod config;
mod conn;
mod error;
mod handler;
mod http_server;
mod keep_alive;
mod metrics;
mod response;
mod tests;

// Re-export public items
pub use config::ServerConfig;
pub use conn::{serve_connection, ConnOutcome};
pub use error::Error;
pub use handler::{Context, DynWriter, Handler, HandlerFn, HandlerFuture};
pub use http_server::{HttpServer, ShutdownSignal};
pub use keep_alive::should_close;
pub use metrics::{Metrics, MetricsSnapshot};
pub use response::{ResponseSummary, ResponseWriter, StatusCode};
