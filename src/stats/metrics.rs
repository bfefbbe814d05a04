//! Statistics and metrics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Relay-wide counters, updated concurrently by all workers
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    connections_accepted: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    frames_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    frames_suppressed: AtomicU64,
    write_failures: AtomicU64,
    worker_errors: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            frames_suppressed: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            worker_errors: AtomicU64::new(0),
        }
    }

    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// One frame written to one destination
    pub fn record_relayed(&self, bytes: usize) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A destination had nothing to receive from a frame
    pub fn record_suppressed(&self) {
        self.frames_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_error(&self) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            frames_suppressed: self.frames_suppressed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the relay started
    pub uptime: Duration,
    /// Total connections ever accepted
    pub connections_accepted: u64,
    /// Frames read from clients
    pub frames_received: u64,
    /// Bytes read from clients, separators excluded
    pub bytes_received: u64,
    /// Frames written to destinations
    pub frames_relayed: u64,
    /// Bytes written to destinations, separators excluded
    pub bytes_relayed: u64,
    /// Destination payloads skipped because they were empty
    pub frames_suppressed: u64,
    /// Destinations dropped after a failed write
    pub write_failures: u64,
    /// Workers that ended with an error
    pub worker_errors: u64,
}
