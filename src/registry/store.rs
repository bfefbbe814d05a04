//! Connection registry implementation
//!
//! The set of live connections together with each one's model
//! subscriptions. Every operation takes the same lock, so a snapshot taken
//! for relaying never sees a connection half inserted or half removed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use super::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::metadata::SharedModels;

/// A relay destination as seen at snapshot time
#[derive(Debug, Clone)]
pub struct RelayTarget {
    /// The destination connection
    pub connection: Arc<ConnectionHandle>,
    /// Its subscriptions when the snapshot was taken
    pub shared_models: SharedModels,
}

struct Entry {
    connection: Arc<ConnectionHandle>,
    shared_models: SharedModels,
}

struct Inner {
    next_id: ConnectionId,
    /// Keyed by ID, so iteration follows accept order
    connections: BTreeMap<ConnectionId, Entry>,
}

/// Registry of all live connections of one relay
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                connections: BTreeMap::new(),
            }),
        }
    }

    /// Register a new connection
    ///
    /// Assigns the next sequential ID and returns the shared handle.
    pub async fn add<W>(
        &self,
        peer_addr: SocketAddr,
        writer: W,
        separator: u8,
    ) -> Arc<ConnectionHandle>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut inner = self.inner.lock().await;

        let id = inner.next_id;
        inner.next_id += 1;

        let connection = Arc::new(ConnectionHandle::new(id, peer_addr, writer, separator));
        inner.connections.insert(
            id,
            Entry {
                connection: Arc::clone(&connection),
                shared_models: SharedModels::new(),
            },
        );

        tracing::info!(
            conn_id = id,
            peer = %peer_addr,
            clients = inner.connections.len(),
            "Client connected"
        );

        connection
    }

    /// Remove a connection
    ///
    /// Safe to call more than once; only the first call returns `true`.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.connections.remove(&id) {
            Some(entry) => {
                tracing::info!(
                    conn_id = id,
                    peer = %entry.connection.peer_addr(),
                    clients = inner.connections.len(),
                    "Client disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of every connection except `excluding`, in accept order
    pub async fn list_others(&self, excluding: Option<ConnectionId>) -> Vec<RelayTarget> {
        let inner = self.inner.lock().await;

        inner
            .connections
            .iter()
            .filter(|(id, _)| Some(**id) != excluding)
            .map(|(_, entry)| RelayTarget {
                connection: Arc::clone(&entry.connection),
                shared_models: entry.shared_models.clone(),
            })
            .collect()
    }

    /// Number of registered connections
    pub async fn count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Replace the subscriptions of a connection
    ///
    /// Returns `false` if the connection is no longer registered.
    pub async fn set_shared_models(&self, id: ConnectionId, models: SharedModels) -> bool {
        let mut inner = self.inner.lock().await;

        match inner.connections.get_mut(&id) {
            Some(entry) => {
                tracing::debug!(conn_id = id, models = ?models, "Shared models updated");
                entry.shared_models = models;
                true
            }
            None => false,
        }
    }

    /// Current subscriptions of a connection
    pub async fn shared_models(&self, id: ConnectionId) -> Option<SharedModels> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .get(&id)
            .map(|entry| entry.shared_models.clone())
    }

    /// Ask every registered connection to close
    ///
    /// Returns the number of connections signalled. Workers remove their
    /// own entries as they terminate.
    pub async fn close_all(&self) -> usize {
        let inner = self.inner.lock().await;
        for entry in inner.connections.values() {
            entry.connection.close();
        }
        inner.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
