//! Broadcast router
//!
//! Fans a frame out to every connection except its sender. In filtered
//! mode each destination only gets the change entries of the models it
//! subscribed to; in unfiltered mode everyone gets the frame as is.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::protocol::changes::{is_empty_payload, ModelGroups};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::stats::RelayStats;

/// What happened to one relayed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Destinations the frame was written to
    pub delivered: usize,
    /// Destinations skipped because their payload was empty
    pub suppressed: usize,
    /// Destinations dropped after a failed write
    pub failed: usize,
}

/// Routes frames from one connection to the others
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    unfiltered: bool,
    verbose: bool,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        stats: Arc<RelayStats>,
        unfiltered: bool,
        verbose: bool,
    ) -> Self {
        Self {
            registry,
            stats,
            unfiltered,
            verbose,
        }
    }

    /// Relay `frame` from `sender` to every other live connection
    ///
    /// A failed write drops that destination only. The error case is a
    /// malformed change payload, which is the sender's problem.
    pub async fn relay(
        &self,
        frame: &Bytes,
        sender: &ConnectionHandle,
    ) -> Result<RelayOutcome, ProtocolError> {
        let groups = if self.unfiltered {
            None
        } else {
            Some(ModelGroups::from_payload(frame)?)
        };

        let mut outcome = RelayOutcome::default();

        for target in self.registry.list_others(Some(sender.id())).await {
            let destination = &target.connection;
            if !destination.is_alive() {
                continue;
            }

            let payload = match &groups {
                Some(groups) => groups.payload_for(&target.shared_models),
                None => frame.clone(),
            };

            if is_empty_payload(&payload) {
                outcome.suppressed += 1;
                self.stats.record_suppressed();
                continue;
            }

            if self.verbose {
                tracing::debug!(
                    from = sender.id(),
                    to = destination.id(),
                    payload = %String::from_utf8_lossy(&payload),
                    "Relaying frame"
                );
            }

            if self.deliver(sender, destination, &payload).await {
                outcome.delivered += 1;
            } else {
                outcome.failed += 1;
            }
        }

        Ok(outcome)
    }

    async fn deliver(
        &self,
        sender: &ConnectionHandle,
        destination: &Arc<ConnectionHandle>,
        payload: &[u8],
    ) -> bool {
        match destination.send_frame(payload).await {
            Ok(()) => {
                self.stats.record_relayed(payload.len());
                true
            }
            Err(e) if !destination.is_alive() => {
                tracing::debug!(
                    from = sender.id(),
                    to = destination.id(),
                    error = %e,
                    "Destination closed while relaying"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    from = sender.id(),
                    to = destination.id(),
                    peer = %destination.peer_addr(),
                    error = %e,
                    "Relaying failed, dropping destination"
                );
                self.stats.record_write_failure();
                destination.close();
                self.registry.remove(destination.id()).await;
                false
            }
        }
    }
}
