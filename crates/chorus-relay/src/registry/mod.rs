//! Connection Registry for real-time message routing.
//!
//! This module provides a thread-safe registry that tracks live connections
//! by their relay-assigned identity, enabling broadcast and unicast routing
//! between connections.
//!
//! ## Architecture
//!
//! Each connection registers a handle when it becomes established. The
//! router takes point-in-time snapshots of the registry and delivers
//! through the handles without holding any registry lock.
//!
//! ```text
//! socket task (id-A) <-> ConnectionRegistry <-> socket task (id-B)
//!        |                       |                      |
//!        v                       v                      v
//!  mpsc::Sender          DashMap<Identity,        mpsc::Sender
//!                          ConnectionEntry>
//! ```

mod connection_registry;
mod handle;

pub use connection_registry::{ConnectionEntry, ConnectionRegistry, PeerInfo};
pub use handle::{ChannelHandle, ConnectionHandle};
