//! Connection registry
//!
//! Tracks every live client connection and what it subscribes to. Workers
//! consult it to find relay destinations.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<ConnectionRegistry>
//!                ┌──────────────────────────────┐
//!                │ Mutex<BTreeMap<Id, Entry {   │
//!                │   connection: Arc<Handle>,   │
//!                │   shared_models,             │
//!                │ }>>                          │
//!                └──────────────┬───────────────┘
//!                               │ list_others(sender)
//!         ┌─────────────────────┼─────────────────────┐
//!         ▼                     ▼                     ▼
//!    [Worker A]            [Worker B]            [Worker C]
//!    read_frame()          handle.send_frame()   handle.send_frame()
//!         │                     ▲                     ▲
//!         └──► router.relay() ──┴─────────────────────┘
//! ```
//!
//! Each handle carries its own write lock, so relays from different senders
//! into the same destination are serialized without blocking unrelated
//! destinations.

pub mod connection;
pub mod store;

pub use connection::{BoxedWriter, ConnectionHandle, ConnectionId};
pub use store::{ConnectionRegistry, RelayTarget};
