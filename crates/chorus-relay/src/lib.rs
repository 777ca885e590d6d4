//! # chorus-relay
//!
//! Connection registry and message routing core for the Chorus relay.
//!
//! Every connected peer gets an opaque identity. Peers exchange JSON
//! envelopes `{from, to, message}` addressed to one identity or to `ALL`,
//! and the relay announces every connect and disconnect with a `SYSTEM`
//! envelope. This crate knows nothing about HTTP or sockets: a transport
//! drives it through [`Relay::connect`] and [`Relay::disconnect`] and hands
//! it a [`ConnectionHandle`] per connection.
//!
//! ## Architecture
//!
//! - **Identity**: random UUID allocation, never a reserved token
//! - **Registry**: concurrent identity → handle map, snapshot iteration
//! - **Lifecycle**: establish/teardown state machine, join/leave notices
//! - **Routing**: broadcast and unicast with per-recipient failure isolation
//! - **Broker**: `/user/..`, `/topic/..` and `/queue/..` destinations

pub mod broker;
pub mod envelope;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod routing;

mod error;
mod types;

#[cfg(test)]
mod testing;

pub use broker::{BrokerConfig, Destination, SubscriptionMode, TopicBroker};
pub use envelope::{decode_broker_frame, decode_inbound, BrokerFrame, Envelope, OutboundFrame};
pub use error::{RelayError, SendError};
pub use identity::IdentityAllocator;
pub use lifecycle::{LifecycleManager, Session};
pub use registry::{ChannelHandle, ConnectionHandle, ConnectionRegistry, PeerInfo};
pub use relay::{undeliverable_notice, BrokerReply, Relay, RelayConfig};
pub use routing::{DeliveryReport, MessageRouter, RouteOutcome, RouterConfig};
pub use types::*;
