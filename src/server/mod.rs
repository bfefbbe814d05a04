//! Relay server
//!
//! The accept loop, one worker per connection and the router workers use
//! to fan frames out.

pub mod config;
pub mod listener;
pub mod router;
pub mod worker;

pub use config::{RelayConfig, DEFAULT_PORT};
pub use listener::SyncRelay;
pub use router::{RelayOutcome, Router};
pub use worker::{RelayWorker, WorkerPhase};
