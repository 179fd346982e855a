//! Per-connection request loop.
//!
//! Drives parse → handler dispatch → keep-alive decision over one
//! transport until the peer leaves, a deadline fires, an error ends the
//! exchange, the request cap is reached, or the server shuts down.
//! Within a connection everything is sequential; a response is fully
//! written before the next request is read.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::parser::{Error as ParserError, Method, RequestParser};
use crate::server::config::ServerConfig;
use crate::server::handler::{Context, DynWriter, Handler};
use crate::server::keep_alive::should_close;
use crate::server::metrics::Metrics;
use crate::server::response::{ResponseWriter, StatusCode};

/// How a connection loop ended.
pub enum ConnOutcome<S> {
    /// The exchange is over; the transport should be dropped.
    Closed,
    /// A handler hijacked the connection; the transport is handed back
    /// to the caller for the upgraded protocol.
    Hijacked(S),
}

/// Serve requests on one transport until it is done.
///
/// `shutting_down` is polled every iteration; once raised, the current
/// response goes out with `Connection: close` and the loop exits.
pub async fn serve_connection<S, H>(
    mut stream: S,
    peer_addr: Option<SocketAddr>,
    handler: &H,
    config: &ServerConfig,
    metrics: &Metrics,
    shutting_down: &AtomicBool,
) -> ConnOutcome<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler + ?Sized,
{
    // The accumulation buffer outlives each request so pipelined bytes
    // read past the end of one request are kept for the next.
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut requests_served: usize = 0;

    loop {
        // First request gets the read timeout; a kept-alive connection
        // waiting for its next request gets the idle timeout.
        let read_deadline = if requests_served == 0 {
            config.read_timeout
        } else {
            config.idle_timeout
        };

        let mut parser =
            RequestParser::new(config.max_header_bytes, config.max_request_body_size);

        let parse_result =
            timeout(read_deadline, parser.read_request(&mut stream, &mut buf)).await;

        let request = match parse_result {
            Err(_elapsed) => {
                if parser.at_start() && buf.is_empty() {
                    // Idle connection ran out its deadline.
                    debug!("connection idle timeout");
                } else {
                    debug!("read timeout mid-request");
                    respond_error(&mut stream, StatusCode::RequestTimeout, "request timed out")
                        .await;
                }
                break;
            }
            Ok(Ok(None)) => {
                // Peer closed a persistent connection between requests.
                debug!("peer closed connection");
                break;
            }
            Ok(Ok(Some(request))) => request,
            Ok(Err(ParserError::Io(err))) => {
                debug!("transport error while reading request: {err}");
                break;
            }
            Ok(Err(err)) if err.is_size_limit() => {
                warn!("request exceeded size limits: {err}");
                respond_error(&mut stream, StatusCode::PayloadTooLarge, &err.to_string()).await;
                break;
            }
            Ok(Err(err)) => {
                warn!("failed to parse request: {err}");
                respond_error(&mut stream, StatusCode::BadRequest, "invalid request").await;
                break;
            }
        };

        let started = Instant::now();

        let mut writer = ResponseWriter::new((&mut stream) as DynWriter<'_>);
        if request.method == Method::HEAD {
            writer.suppress_body();
        }
        if shutting_down.load(Ordering::SeqCst) {
            writer.stage_header("connection", "close");
        }

        if request.expects_continue() {
            if let Err(err) = writer.write_continue().await {
                warn!("failed to write 100 Continue: {err}");
                break;
            }
        }

        let (serve_result, hijacked) = {
            let mut ctx = Context::new(&request, &mut writer, peer_addr);
            let result = timeout(config.write_timeout, handler.serve(&mut ctx)).await;
            (result, ctx.is_hijacked())
        };

        match serve_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if writer.summary().wrote_anything {
                    // Cannot rewrite the status line; truncate and close.
                    error!("handler failed after writing, closing connection: {err}");
                } else {
                    error!("handler failed before writing: {err}");
                    let _ = writer
                        .error(StatusCode::InternalServerError, "Internal Server Error")
                        .await;
                    let _ = writer.flush().await;
                }
                break;
            }
            Err(_elapsed) => {
                if writer.summary().wrote_anything {
                    warn!("write timeout mid-response, closing connection");
                } else {
                    warn!("handler exceeded write timeout");
                    let _ = writer
                        .error(StatusCode::RequestTimeout, "request timed out")
                        .await;
                    let _ = writer.flush().await;
                }
                break;
            }
        }

        let _ = writer.flush().await;
        let summary = writer.summary();
        drop(writer);

        requests_served += 1;
        let status = summary.status_code.map(|code| code.as_u16()).unwrap_or(0);
        metrics.record_request(status, started.elapsed());
        debug!(
            "{} {} -> {} in {:?}",
            request.method,
            request.path,
            status,
            started.elapsed()
        );

        if hijacked {
            info!("connection hijacked after {requests_served} request(s)");
            return ConnOutcome::Hijacked(stream);
        }

        if let Some(budget) = config.request_timeout {
            if started.elapsed() > budget {
                debug!("request exceeded wall-clock budget, closing connection");
                break;
            }
        }

        if should_close(&request, &summary, shutting_down.load(Ordering::SeqCst)) {
            break;
        }

        if requests_served >= config.max_requests_per_conn {
            debug!(
                "connection reached request cap ({})",
                config.max_requests_per_conn
            );
            break;
        }
    }

    ConnOutcome::Closed
}

/// Best-effort error response on a connection that is about to close.
async fn respond_error<S>(stream: &mut S, code: StatusCode, message: &str)
where
    S: AsyncWrite + Unpin + Send,
{
    let mut writer = ResponseWriter::new(stream as DynWriter<'_>);
    writer.stage_header("connection", "close");
    if let Err(err) = writer.error(code, message).await {
        debug!("failed to write {} response: {err}", code.as_u16());
        return;
    }
    let _ = writer.flush().await;
}
