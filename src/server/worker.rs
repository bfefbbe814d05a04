//! Relay worker
//!
//! One worker per connection. It owns the read half, pulls frames off it
//! and drives each frame through metadata extraction and the router.
//!
//! ```text
//! Created ──run()──► Running ──EOF / read error / close()──► Closing ──► Terminated
//!                      │  ▲
//!                      └──┘ frame: strip metadata → relay
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::router::Router;
use crate::error::Result;
use crate::protocol::changes::is_empty_payload;
use crate::protocol::frame::FrameReader;
use crate::protocol::metadata::strip_metadata;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::stats::RelayStats;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Registered, loop not started
    Created,
    /// Reading and relaying frames
    Running,
    /// Tearing the connection down
    Closing,
    /// Connection closed and removed from the registry
    Terminated,
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Eof,
    ReadFailed,
    CloseRequested,
}

/// Relay worker for a single connection
pub struct RelayWorker<R> {
    connection: Arc<ConnectionHandle>,
    reader: FrameReader<R>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    stats: Arc<RelayStats>,
    phase: WorkerPhase,
    verbose: bool,
}

impl<R: AsyncRead + Unpin> RelayWorker<R> {
    pub fn new(
        connection: Arc<ConnectionHandle>,
        reader: FrameReader<R>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        stats: Arc<RelayStats>,
        verbose: bool,
    ) -> Self {
        Self {
            connection,
            reader,
            registry,
            router,
            stats,
            phase: WorkerPhase::Created,
            verbose,
        }
    }

    /// ID of the connection this worker serves
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Run until the connection ends, then tear it down
    ///
    /// Teardown happens on every path. An error is the worker's terminal
    /// error, a frame that broke a protocol precondition.
    pub async fn run(&mut self) -> Result<()> {
        self.phase = WorkerPhase::Running;

        let result = self.read_loop().await;
        match &result {
            Ok(exit) => tracing::debug!(conn_id = self.id(), reason = ?exit, "Worker stopping"),
            Err(e) => tracing::warn!(conn_id = self.id(), error = %e, "Worker failed"),
        }

        self.terminate().await;
        result.map(|_| ())
    }

    async fn read_loop(&mut self) -> Result<Exit> {
        loop {
            let read = tokio::select! {
                _ = self.connection.closed() => return Ok(Exit::CloseRequested),
                read = self.reader.read_frame() => read,
            };

            match read {
                Ok(Some(frame)) => self.handle_frame(frame).await?,
                Ok(None) => return Ok(Exit::Eof),
                Err(e) => {
                    use std::io::ErrorKind::*;
                    match e.kind() {
                        ConnectionReset | ConnectionAborted | BrokenPipe => {
                            tracing::debug!(conn_id = self.id(), error = %e, "Socket closed")
                        }
                        _ => tracing::warn!(conn_id = self.id(), error = %e, "Problem reading"),
                    }
                    return Ok(Exit::ReadFailed);
                }
            }
        }
    }

    /// Process one incoming frame
    pub async fn handle_frame(&mut self, frame: Bytes) -> Result<()> {
        self.stats.record_received(frame.len());

        let stripped = strip_metadata(&frame)?;
        if let Some(metadata) = stripped.metadata {
            tracing::info!(
                conn_id = self.id(),
                models = ?metadata.shared_models,
                "Client shared models"
            );
            self.registry
                .set_shared_models(self.id(), metadata.shared_models)
                .await;
        }

        let payload = stripped.payload;
        if is_empty_payload(&payload) {
            return Ok(());
        }

        if self.verbose {
            tracing::debug!(
                conn_id = self.id(),
                payload = %String::from_utf8_lossy(&payload),
                "Got frame"
            );
        }

        let outcome = self.router.relay(&payload, &self.connection).await?;
        if self.verbose {
            tracing::debug!(
                conn_id = self.id(),
                delivered = outcome.delivered,
                suppressed = outcome.suppressed,
                failed = outcome.failed,
                "Frame relayed"
            );
        }

        Ok(())
    }

    async fn terminate(&mut self) {
        self.phase = WorkerPhase::Closing;

        self.connection.close();
        self.connection.shutdown().await;
        self.registry.remove(self.id()).await;

        self.phase = WorkerPhase::Terminated;
    }
}

/// Counts a worker as live until dropped
#[derive(Debug)]
pub struct WorkerGuard {
    live: Arc<AtomicUsize>,
}

impl WorkerGuard {
    pub fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::protocol::metadata::SharedModels;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        stats: Arc<RelayStats>,
    }

    impl Harness {
        fn new(unfiltered: bool) -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let stats = Arc::new(RelayStats::new());
            let router = Arc::new(Router::new(
                Arc::clone(&registry),
                Arc::clone(&stats),
                unfiltered,
                false,
            ));
            Self {
                registry,
                router,
                stats,
            }
        }

        /// Returns the worker plus the client's (write, read) ends
        async fn connect(
            &self,
            port: u16,
        ) -> (RelayWorker<DuplexStream>, DuplexStream, FrameReader<DuplexStream>) {
            let (client_out, server_in) = tokio::io::duplex(4096);
            let (server_out, client_in) = tokio::io::duplex(4096);
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

            let connection = self.registry.add(addr, server_out, b'\n').await;
            let worker = RelayWorker::new(
                connection,
                FrameReader::new(server_in, b'\n'),
                Arc::clone(&self.registry),
                Arc::clone(&self.router),
                Arc::clone(&self.stats),
                false,
            );
            (worker, client_out, FrameReader::new(client_in, b'\n'))
        }
    }

    #[tokio::test]
    async fn test_metadata_updates_subscriptions() {
        let harness = Harness::new(false);
        let (mut worker, _out, _in) = harness.connect(1).await;

        let frame = Bytes::from_static(
            br#"{"DServerMetaData:c": {"SHARED_MODELS": ["\"DModel:r:a\"", "\"DModel:r:b\""]}}"#,
        );
        worker.handle_frame(frame).await.unwrap();

        let expected: SharedModels = ["DModel:r:a".to_string(), "DModel:r:b".to_string()].into();
        assert_eq!(
            harness.registry.shared_models(worker.id()).await,
            Some(expected)
        );

        // A later block without the key clears the set
        let frame = Bytes::from_static(br#"{"DServerMetaData:c": {}}"#);
        worker.handle_frame(frame).await.unwrap();
        assert_eq!(
            harness.registry.shared_models(worker.id()).await,
            Some(SharedModels::new())
        );
    }

    #[tokio::test]
    async fn test_metadata_only_frame_not_relayed() {
        let harness = Harness::new(true);
        let (mut worker, _out, _in) = harness.connect(1).await;
        let (_other, _other_out, mut other_in) = harness.connect(2).await;

        let frame = Bytes::from_static(br#"{"DServerMetaData:c": {"SHARED_MODELS": []}}"#);
        worker.handle_frame(frame).await.unwrap();

        let read = tokio::time::timeout(Duration::from_millis(50), other_in.read_frame()).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn test_eof_terminates_and_unregisters() {
        let harness = Harness::new(true);
        let (mut worker, out, _in) = harness.connect(1).await;
        assert_eq!(harness.registry.count().await, 1);
        assert_eq!(worker.phase(), WorkerPhase::Created);

        drop(out);
        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .expect("worker should stop on EOF")
            .unwrap();

        assert_eq!(worker.phase(), WorkerPhase::Terminated);
        assert_eq!(harness.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_read() {
        let harness = Harness::new(true);
        let (mut worker, _out, mut client_in) = harness.connect(1).await;
        let connection = harness.registry.list_others(None).await[0].connection.clone();

        let task = tokio::spawn(async move { worker.run().await });
        connection.close();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should stop on close")
            .unwrap()
            .unwrap();

        assert_eq!(harness.registry.count().await, 0);
        // The client sees end of stream
        assert!(client_in.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relays_between_workers() {
        let harness = Harness::new(true);
        let (mut worker_a, mut out_a, _in_a) = harness.connect(1).await;
        let (mut worker_b, _out_b, mut in_b) = harness.connect(2).await;

        let task_a = tokio::spawn(async move { worker_a.run().await });
        let task_b = tokio::spawn(async move { worker_b.run().await });

        out_a.write_all(b"one\ntwo\n").await.unwrap();

        assert_eq!(in_b.read_frame().await.unwrap().unwrap(), "one");
        assert_eq!(in_b.read_frame().await.unwrap().unwrap(), "two");

        harness.registry.close_all().await;
        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
        assert_eq!(harness.stats.snapshot().frames_relayed, 2);
    }

    #[tokio::test]
    async fn test_protocol_error_is_terminal() {
        let harness = Harness::new(false);
        let (mut worker, mut out, _in) = harness.connect(1).await;

        out.write_all(b"{\"DModel:r:a\": {\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .expect("worker should stop");
        assert!(result.is_err());
        assert_eq!(harness.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_read_error_terminates_like_eof() {
        let harness = Harness::new(true);
        let (server_out, _client_in) = tokio::io::duplex(64);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let connection = harness.registry.add(addr, server_out, b'\n').await;

        let reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::Other, "boom"))
            .build();
        let mut worker = RelayWorker::new(
            connection,
            FrameReader::new(reader, b'\n'),
            Arc::clone(&harness.registry),
            Arc::clone(&harness.router),
            Arc::clone(&harness.stats),
            false,
        );

        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .expect("worker should stop on a read error")
            .unwrap();

        assert_eq!(worker.phase(), WorkerPhase::Terminated);
        assert_eq!(harness.registry.count().await, 0);
        assert_eq!(harness.stats.snapshot().frames_received, 0);
    }

    #[test]
    fn test_worker_guard() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = WorkerGuard::new(&live);
        let b = WorkerGuard::new(&live);
        assert_eq!(live.load(Ordering::SeqCst), 2);

        drop(a);
        drop(b);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
