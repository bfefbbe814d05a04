//! Relay listener
//!
//! Binds the listening socket, runs the accept loop and owns the worker
//! tasks. Shutdown is synchronous: [`SyncRelay::shutdown`] returns only
//! after every worker has terminated.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::config::RelayConfig;
use super::router::Router;
use super::worker::{RelayWorker, WorkerGuard};
use crate::error::Result;
use crate::protocol::frame::FrameReader;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::stats::{RelayStats, StatsSnapshot};

/// A running relay
pub struct SyncRelay {
    local_addr: SocketAddr,
    separator: u8,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    active_workers: Arc<AtomicUsize>,
    closing: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl SyncRelay {
    /// Bind the listening socket and start accepting clients
    ///
    /// Fails if the separator is not a single byte or the address cannot
    /// be bound; no relay exists in either case.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let separator = config.separator_byte()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::new());
        let active_workers = Arc::new(AtomicUsize::new(0));
        let closing = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.unfiltered,
            config.verbose,
        ));

        let accept_loop = AcceptLoop {
            separator,
            tcp_nodelay: config.tcp_nodelay,
            verbose: config.verbose,
            registry: Arc::clone(&registry),
            router,
            stats: Arc::clone(&stats),
            active_workers: Arc::clone(&active_workers),
            closing: Arc::clone(&closing),
        };
        let accept_task = tokio::spawn(accept_loop.run(listener, shutdown_rx));

        tracing::info!(
            addr = %local_addr,
            unfiltered = config.unfiltered,
            "Relay listening"
        );

        Ok(Self {
            local_addr,
            separator,
            registry,
            stats,
            active_workers,
            closing,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// Address the relay is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port the relay is bound to
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Frame separator byte
    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// The connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of connected clients
    pub async fn client_count(&self) -> usize {
        self.registry.count().await
    }

    /// Number of worker tasks that have not terminated yet
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Current relay statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run until `signal` resolves, then shut down
    pub async fn run_until<F>(mut self, signal: F)
    where
        F: std::future::Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await;
    }

    /// Stop accepting, close every connection and wait for all workers
    ///
    /// When this returns no worker is live and the registry is empty.
    /// Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };
        tracing::info!(port = self.port(), "Relay shutting down");

        self.closing.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        if let Err(e) = task.await {
            tracing::error!(error = %e, "Accept loop failed");
        }

        tracing::info!(port = self.port(), "Relay stopped");
    }
}

impl Drop for SyncRelay {
    fn drop(&mut self) {
        // Tears down in the background; only `shutdown` waits for it
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
    }
}

struct AcceptLoop {
    separator: u8,
    tcp_nodelay: bool,
    verbose: bool,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    stats: Arc<RelayStats>,
    active_workers: Arc<AtomicUsize>,
    closing: Arc<AtomicBool>,
}

/// A worker's connection and how its task ended
type WorkerExit = (ConnectionId, std::result::Result<Result<()>, JoinError>);

impl AcceptLoop {
    async fn run(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();

        loop {
            tokio::select! {
                // Fires on shutdown and when the relay handle is dropped
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.spawn_worker(&mut workers, socket, peer_addr).await;
                    }
                    Err(e) => {
                        if !self.closing.load(Ordering::SeqCst) {
                            tracing::warn!(error = %e, "Could not connect with client");
                        }
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        tracing::debug!(port = ?listener.local_addr().ok(), "Stop listening for clients");
        drop(listener);

        let signalled = self.registry.close_all().await;
        tracing::debug!(connections = signalled, "Closing connections");

        while let Some(joined) = workers.join_next().await {
            self.reap(joined);
        }
    }

    async fn spawn_worker(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) {
        if self.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let (read_half, write_half) = socket.into_split();
        let connection = self
            .registry
            .add(peer_addr, write_half, self.separator)
            .await;
        self.stats.record_connection();

        let mut worker = RelayWorker::new(
            Arc::clone(&connection),
            FrameReader::new(read_half, self.separator),
            Arc::clone(&self.registry),
            Arc::clone(&self.router),
            Arc::clone(&self.stats),
            self.verbose,
        );
        let guard = WorkerGuard::new(&self.active_workers);

        let run = async move { worker.run().await };
        workers.spawn(supervise(Arc::clone(&self.registry), connection, guard, run));
    }

    fn reap(&self, joined: std::result::Result<WorkerExit, JoinError>) {
        match joined {
            Ok((_, Ok(Ok(())))) => {}
            Ok((conn_id, Ok(Err(e)))) => {
                self.stats.record_worker_error();
                tracing::warn!(conn_id = conn_id, error = %e, "Worker ended with error");
            }
            Ok((conn_id, Err(e))) => {
                self.stats.record_worker_error();
                tracing::error!(conn_id = conn_id, error = %e, "Worker panicked");
            }
            Err(e) => {
                self.stats.record_worker_error();
                tracing::error!(error = %e, "Worker supervisor failed");
            }
        }
    }
}

/// Run a worker in its own task and clean up after it if it panics
///
/// A worker that returns has already torn its connection down. One that
/// panicked never reached teardown, so the connection is closed and
/// unregistered here. The guard is held until cleanup is done.
async fn supervise<F>(
    registry: Arc<ConnectionRegistry>,
    connection: Arc<ConnectionHandle>,
    guard: WorkerGuard,
    run: F,
) -> WorkerExit
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let _guard = guard;
    let conn_id = connection.id();

    let joined = tokio::spawn(run).await;
    if joined.is_err() {
        connection.close();
        connection.shutdown().await;
        registry.remove(conn_id).await;
    }

    (conn_id, joined)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn panicking_worker() -> Result<()> {
        panic!("worker bug")
    }

    #[tokio::test]
    async fn test_panicked_worker_is_unregistered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let live = Arc::new(AtomicUsize::new(0));
        let (writer, _reader) = tokio::io::duplex(64);
        let connection = registry.add(addr(1), writer, b'\n').await;
        let guard = WorkerGuard::new(&live);

        let (conn_id, joined) = supervise(
            Arc::clone(&registry),
            Arc::clone(&connection),
            guard,
            panicking_worker(),
        )
        .await;

        assert_eq!(conn_id, connection.id());
        assert!(joined.unwrap_err().is_panic());
        assert!(!connection.is_alive());
        assert_eq!(registry.count().await, 0);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finished_worker_result_passed_through() {
        let registry = Arc::new(ConnectionRegistry::new());
        let live = Arc::new(AtomicUsize::new(0));
        let (writer, _reader) = tokio::io::duplex(64);
        let connection = registry.add(addr(1), writer, b'\n').await;
        let guard = WorkerGuard::new(&live);

        let (_, joined) = supervise(
            Arc::clone(&registry),
            Arc::clone(&connection),
            guard,
            async { Ok(()) },
        )
        .await;

        assert!(matches!(joined, Ok(Ok(()))));
        // Teardown of a returning worker is the worker's own job
        assert_eq!(registry.count().await, 1);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
