//! Connection handle
//!
//! The part of a client connection that is shared between its own relay
//! worker, the registry and other workers relaying into it. The read half
//! stays with the worker; everything here is safe to use from any task.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

use crate::protocol::frame::write_frame;

/// Unique connection identifier, assigned in accept order
pub type ConnectionId = u64;

/// Type-erased write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to one client connection
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    separator: u8,

    /// Write half; the lock keeps frames from different senders whole
    writer: Mutex<BoxedWriter>,

    /// Flips to `true` once when the connection starts closing
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub(super) fn new<W>(id: ConnectionId, peer_addr: SocketAddr, writer: W, separator: u8) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);

        Self {
            id,
            peer_addr,
            separator,
            writer: Mutex::new(Box::new(writer)),
            closed,
        }
    }

    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection has not started closing yet
    pub fn is_alive(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Request the connection to close
    ///
    /// Wakes the owning worker if it is blocked reading. Returns `true` for
    /// the call that actually flipped the flag.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Write one frame to this connection
    ///
    /// Gives up with `NotConnected` if the connection is closed while the
    /// write is waiting on the lock or on a slow peer.
    pub async fn send_frame(&self, payload: &[u8]) -> io::Result<()> {
        let write = async {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, payload, self.separator).await
        };

        tokio::select! {
            result = write => result,
            _ = self.closed() => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            )),
        }
    }

    /// Shut down the write half so the peer sees end of stream
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(conn_id = self.id, error = %e, "Error shutting down writer");
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}
