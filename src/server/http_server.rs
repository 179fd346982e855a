//! HTTP server: accept loop and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::server::config::ServerConfig;
use crate::server::conn::{serve_connection, ConnOutcome};
use crate::server::error::Error;
use crate::server::handler::{DynWriter, Handler};
use crate::server::metrics::Metrics;
use crate::server::response::{ResponseWriter, StatusCode};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Cooperative shutdown trigger shared between the acceptor and every
/// connection loop.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Raise the flag and wake the acceptor. Connection loops finish the
    /// request they are on, stamp `Connection: close`, and exit.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.flag
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// An HTTP server: one task per accepted connection, bounded by the
/// configured connection cap.
pub struct HttpServer<H> {
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    metrics: Arc<Metrics>,
    shutdown: Arc<ShutdownSignal>,
    shutdown_grace: Duration,
}

impl<H: Handler + 'static> HttpServer<H> {
    /// Create a new HTTP server with the given configuration and handler.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            metrics: Arc::new(Metrics::new()),
            shutdown: Arc::new(ShutdownSignal::default()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Bound how long shutdown waits for in-flight responses before
    /// aborting the remaining connections.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Server runtime metrics.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// A handle callers can use to trigger graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    /// Start the server and accept connections until shutdown.
    pub async fn start(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.config.addr).await?;
        info!("server listening on http://{}", self.config.addr);

        let semaphore = Arc::new(Semaphore::new(self.config.max_conns));
        let mut tasks = JoinSet::new();

        // Ctrl+C triggers the same cooperative shutdown as the handle.
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, initiating graceful shutdown");
                shutdown.signal();
            }
        });

        loop {
            if self.shutdown.is_shutting_down() {
                break;
            }

            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("shutting down server");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((socket, addr)) => {
                            self.handle_new_connection(socket, addr, &semaphore, &mut tasks).await;
                        }
                        Err(err) => {
                            error!("error accepting connection: {err}");
                            if err.kind() == std::io::ErrorKind::BrokenPipe {
                                error!("listener broken, shutting down");
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        self.shutdown.signal();
        self.drain(tasks).await;
        Ok(())
    }

    async fn handle_new_connection(
        &self,
        mut socket: tokio::net::TcpStream,
        addr: std::net::SocketAddr,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("connection limit reached, rejecting connection from {addr}");
                let mut writer = ResponseWriter::new((&mut socket) as DynWriter<'_>);
                writer.stage_header("connection", "close");
                let _ = writer
                    .error(StatusCode::ServiceUnavailable, "server is at capacity")
                    .await;
                return;
            }
        };

        let handler = self.handler.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        metrics.connection_opened();
        tasks.spawn(async move {
            // The permit is dropped when the task completes, releasing the
            // connection slot.
            let _permit = permit;

            let outcome = serve_connection(
                socket,
                Some(addr),
                handler.as_ref(),
                &config,
                &metrics,
                shutdown.flag(),
            )
            .await;

            if let ConnOutcome::Hijacked(_stream) = outcome {
                // The default acceptor has no upgrade path; embedders that
                // need one drive serve_connection themselves.
                info!("dropping hijacked connection from {addr}");
            }

            metrics.connection_closed();
        });
    }

    /// Wait for in-flight connections, then abort whatever remains.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        info!(
            "waiting for {len} active connection(s) to complete",
            len = tasks.len()
        );

        let drained = timeout(self.shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    error!("connection task failed during shutdown: {err}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "shutdown grace period expired, aborting {len} connection(s)",
                len = tasks.len()
            );
            tasks.shutdown().await;
        }

        info!("server shutdown complete");
    }
}
