//! Request handlers and the per-request context.
//!
//! A [`Handler`] is invoked exactly once per fully-parsed request with a
//! [`Context`] carrying the request, the response writer, and the request
//! id. Handlers never see a partial or invalid request; parse failures are
//! answered by the connection loop before dispatch.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::AsyncWrite;

use crate::parser::{HttpRequest, HttpVersion, Method};
use crate::server::error::Error;
use crate::server::response::{ResponseWriter, StatusCode};

/// The transport as handlers see it: a type-erased write sink.
pub type DynWriter<'s> = &'s mut (dyn AsyncWrite + Unpin + Send);

/// Boxed future returned by a handler invocation.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// The request-handling capability.
///
/// Implementations must drive the response writer to completion (or
/// hijack the connection) before returning; an `Err` is treated as a
/// handler fault by the connection loop.
pub trait Handler: Send + Sync {
    fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a>;
}

/// Adapter that lets a function serve requests.
pub struct HandlerFn<F>(pub F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a, 'b, 's> Fn(&'a mut Context<'b, 's>) -> HandlerFuture<'a> + Send + Sync,
{
    fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
        (self.0)(ctx)
    }
}

/// Everything a handler gets to work with for one request.
pub struct Context<'a, 's> {
    /// The fully-parsed request.
    pub request: &'a HttpRequest,
    response: &'a mut ResponseWriter<DynWriter<'s>>,
    request_id: String,
    peer_addr: Option<SocketAddr>,
    hijacked: bool,
}

impl<'a, 's> Context<'a, 's> {
    pub(crate) fn new(
        request: &'a HttpRequest,
        response: &'a mut ResponseWriter<DynWriter<'s>>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        let request_id = match request.header("x-request-id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_request_id(),
        };

        Self {
            request,
            response,
            request_id,
            peer_addr,
            hijacked: false,
        }
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn version(&self) -> HttpVersion {
        self.request.version
    }

    /// Get a request header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Look up a single query parameter in the request target.
    pub fn query(&self, key: &str) -> Option<&str> {
        let (_, query) = self.request.path.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then_some(v)
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.request.body)
    }

    /// The request id: client-supplied `X-Request-ID` or generated.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The response writer, for handlers that drive the phases directly.
    pub fn response(&mut self) -> &mut ResponseWriter<DynWriter<'s>> {
        self.response
    }

    // Response shortcuts.

    pub async fn text(&mut self, code: StatusCode, body: &str) -> Result<(), Error> {
        self.response.text(code, body).await
    }

    pub async fn html(&mut self, code: StatusCode, body: &str) -> Result<(), Error> {
        self.response.html(code, body).await
    }

    pub async fn json<T: Serialize>(&mut self, code: StatusCode, value: &T) -> Result<(), Error> {
        self.response.json(code, value).await
    }

    pub async fn error(&mut self, code: StatusCode, message: &str) -> Result<(), Error> {
        self.response.error(code, message).await
    }

    pub async fn redirect(&mut self, code: StatusCode, location: &str) -> Result<(), Error> {
        self.response.redirect(code, location).await
    }

    pub async fn no_content(&mut self) -> Result<(), Error> {
        self.response.no_content().await
    }

    /// Take over the underlying transport (for protocol upgrades).
    ///
    /// The connection loop stops processing the connection and yields
    /// transport ownership to its caller once the handler returns.
    pub fn hijack(&mut self) -> Result<(), Error> {
        if self.hijacked {
            return Err(Error::AlreadyHijacked);
        }
        self.hijacked = true;
        Ok(())
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    /// True for a WebSocket upgrade request.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self
            .header("connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
        upgrade && connection
    }

    /// Best-effort client address: proxy headers first, then the peer.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(xff) = self.header("x-forwarded-for") {
            let first = xff.split(',').next().unwrap_or(xff).trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
        if let Some(real_ip) = self.header("x-real-ip") {
            let real_ip = real_ip.trim();
            if !real_ip.is_empty() {
                return Some(real_ip.to_string());
            }
        }
        self.peer_addr.map(|addr| addr.ip().to_string())
    }
}

/// Process-unique request id: wall-clock nanos plus a sequence number.
fn generate_request_id() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    format!("req-{nanos:x}-{seq:x}")
}
