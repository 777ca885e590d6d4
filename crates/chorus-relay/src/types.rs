//! Common types for the relay core.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Reserved broadcast target.
pub const ALL: &str = "ALL";

/// Reserved sender for lifecycle notifications.
pub const SYSTEM: &str = "SYSTEM";

/// Opaque per-connection identity token.
///
/// Cheap to clone; the token is shared between the registry entry, the
/// session and every envelope the connection sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Identity(Arc<str>);

impl Identity {
    /// Wrap a token as an identity.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// The reserved `SYSTEM` sender.
    pub fn system() -> Self {
        Self::new(SYSTEM)
    }

    /// Borrow the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this token collides with a reserved name.
    pub fn is_reserved(&self) -> bool {
        is_reserved(&self.0)
    }

    /// Whether this is the `SYSTEM` sender.
    pub fn is_system(&self) -> bool {
        &*self.0 == SYSTEM
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0.to_string()
    }
}

/// Whether a raw token is one of the reserved names.
pub fn is_reserved(token: &str) -> bool {
    token == ALL || token == SYSTEM
}

/// The `to` field of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Recipient {
    /// Every registered connection
    All,
    /// Exactly one connection, by identity
    Peer(Identity),
    /// A broker destination (`/topic/..`, `/queue/..`, `/user/..`)
    Destination(String),
}

impl Recipient {
    /// Parse a wire `to` value.
    ///
    /// `ALL` is the broadcast target, anything starting with `/` is a
    /// broker destination and everything else names a peer.
    pub fn parse(raw: &str) -> Self {
        if raw == ALL {
            Recipient::All
        } else if raw.starts_with('/') {
            Recipient::Destination(raw.to_string())
        } else {
            Recipient::Peer(Identity::new(raw))
        }
    }

    /// Whether this targets every connection.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::All)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::All => f.write_str(ALL),
            Recipient::Peer(id) => write!(f, "{}", id),
            Recipient::Destination(dest) => f.write_str(dest),
        }
    }
}

impl From<String> for Recipient {
    fn from(s: String) -> Self {
        Recipient::parse(&s)
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        r.to_string()
    }
}

impl From<Identity> for Recipient {
    fn from(id: Identity) -> Self {
        Recipient::Peer(id)
    }
}

/// Connection state in the relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport accepted, identity not yet registered
    Connecting = 0,
    /// Registered and routable
    Established = 1,
    /// Torn down (terminal)
    Closed = 2,
}

impl ConnectionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Established,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Established => write!(f, "established"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why the transport tore a connection down.
///
/// All reasons are handled identically; the reason is only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the socket
    Normal,
    /// Read or write error on the transport
    Error(String),
    /// Idle or write timeout
    Timeout,
    /// Server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "normal"),
            CloseReason::Error(e) => write!(f, "error: {}", e),
            CloseReason::Timeout => write!(f, "timeout"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}
