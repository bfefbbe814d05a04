//! sync-relay: selective-broadcast relay for shared-model synchronization
//!
//! Clients connect over TCP and exchange separator-delimited change frames.
//! The relay forwards every frame to all other clients. A client that
//! declared the models it is interested in only receives the change
//! entries belonging to those models.
//!
//! # Example
//!
//! ```no_run
//! use sync_relay::{RelayConfig, SyncRelay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::with_addr("0.0.0.0:55055".parse()?);
//!     let relay = SyncRelay::bind(config).await?;
//!     println!("started at port {}", relay.port());
//!
//!     relay
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! # Wire format
//!
//! ```text
//! {"DModel:r:a": {...}, "DNode:x:r:a/child": {...}}\n          change frame
//! {"DServerMetaData:c1": {"SHARED_MODELS": ["\"DModel:r:a\""]}}\n   subscription
//! ```
//!
//! A client whose subscriptions match nothing in a frame receives nothing
//! for it. In unfiltered mode every frame goes to every other client as is.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, ProtocolError, Result};
pub use protocol::{ChangeElement, FrameReader, ModelGroups, SharedModels};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::{RelayConfig, SyncRelay, DEFAULT_PORT};
pub use stats::StatsSnapshot;
