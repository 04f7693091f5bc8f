//! Peer listener.
//!
//! [`PeerListener`] accepts TCP connections and serves each one with a
//! [`ConnectionHandler`] on its own task. At most `worker_pool_size`
//! handlers run at once; further connections are accepted immediately and
//! wait for a free slot, so a slow transfer never stalls the accept loop.
//!
//! Stopping closes the listening socket, lets in-flight connections finish
//! within the shutdown grace period and aborts whatever is left.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peerlink_core::{catalog::MemoryCatalog, config::ServerConfig, server::PeerListener};
//!
//! let mut listener = PeerListener::start(ServerConfig::default(), Arc::new(MemoryCatalog::new())).await?;
//! println!("Listening on {}", listener.local_addr());
//! let report = listener.stop().await;
//! ```

pub mod handler;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::catalog::FileCatalog;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::file;

pub use handler::{ConnectionHandler, HandlerContext, HandlerState};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of [`PeerListener::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that finished within the grace period
    pub drained: usize,
    /// Connections aborted once the grace period ran out
    pub aborted: usize,
}

/// A running peer listener.
pub struct PeerListener {
    local_addr: SocketAddr,
    grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<JoinSet<()>>>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl PeerListener {
    /// Bind the configured address and start accepting connections.
    ///
    /// The shared folder is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`] if the port cannot be bound, or
    /// [`Error::InvalidConfig`] for a zero worker pool.
    pub async fn start(config: ServerConfig, catalog: Arc<dyn FileCatalog>) -> Result<Self> {
        if config.worker_pool_size == 0 {
            return Err(Error::InvalidConfig {
                key: "server.worker_pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        file::ensure_shared_dir(&config.shared_dir).await?;

        let addr = SocketAddr::new(config.bind_address, config.listen_port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            "Peer listener on {} sharing {} ({} workers)",
            local_addr,
            config.shared_dir.display(),
            config.worker_pool_size
        );

        let ctx = Arc::new(HandlerContext {
            catalog,
            shared_dir: config.shared_dir,
            port: local_addr.port(),
            idle_timeout: config.idle_timeout,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicUsize::new(0));
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            workers,
            Arc::clone(&active),
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            grace: config.shutdown_grace,
            shutdown_tx,
            accept_task: Some(accept_task),
            running,
            active,
        })
    }

    /// Address the listener is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port (useful when the configured port was 0).
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Whether the listener is still accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting, drain in-flight connections and abort the rest.
    ///
    /// Calling `stop` again returns an empty report.
    pub async fn stop(&mut self) -> ShutdownReport {
        let Some(accept_task) = self.accept_task.take() else {
            return ShutdownReport::default();
        };

        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let mut connections = match accept_task.await {
            Ok(connections) => connections,
            Err(e) => {
                tracing::error!("Accept loop ended abnormally: {}", e);
                return ShutdownReport::default();
            }
        };

        let mut report = ShutdownReport::default();
        let drain = async {
            while connections.join_next().await.is_some() {
                report.drained += 1;
            }
        };

        if tokio::time::timeout(self.grace, drain).await.is_err() {
            report.aborted = connections.len();
            tracing::warn!(
                "Aborting {} connections still open after {}s",
                report.aborted,
                self.grace.as_secs()
            );
            connections.shutdown().await;
        }

        tracing::info!(
            "Peer listener on {} stopped ({} drained, {} aborted)",
            self.local_addr,
            report.drained,
            report.aborted
        );
        report
    }
}

impl Drop for PeerListener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}

impl std::fmt::Debug for PeerListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerListener")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("active", &self.active_connections())
            .finish_non_exhaustive()
    }
}

/// Decrements the active connection count when a handler ends or is aborted.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<HandlerContext>,
    workers: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = handler::stopped(&mut shutdown_rx) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!("Connection from {}", peer);
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&ctx),
                        Arc::clone(&workers),
                        Arc::clone(&active),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    tracing::debug!(
        "Accept loop on {:?} stopped with {} open connections",
        listener.local_addr().ok(),
        connections.len()
    );
    connections
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<HandlerContext>,
    workers: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let Ok(_permit) = workers.acquire_owned().await else {
        return;
    };
    let _active = ActiveGuard::new(&active);

    configure_tcp_keepalive(&stream);

    let mut handler = ConnectionHandler::new(stream, ctx, peer).with_shutdown(shutdown_rx);
    if let Err(e) = handler.run().await {
        tracing::error!("Connection from {} failed: {}", peer, e);
    }
}

/// Keep idle LAN connections from being dropped by intermediate equipment.
fn configure_tcp_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("Could not enable TCP keep-alive: {}", e);
    }
}
