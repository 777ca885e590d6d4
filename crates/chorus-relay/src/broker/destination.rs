//! Broker destination names.

use std::fmt;

use crate::error::RelayError;
use crate::types::Identity;

/// Prefix of the per-user namespace.
pub const USER_PREFIX: &str = "/user/";

/// Prefix of shared publish/subscribe destinations.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Prefix of shared queue destinations.
pub const QUEUE_PREFIX: &str = "/queue/";

/// Destination that carries connect/disconnect notices.
pub const PRESENCE_DESTINATION: &str = "/topic/presence";

/// A parsed destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `/topic/..` or `/queue/..`, fanned out to subscribers
    Shared(String),
    /// `/user/<identity>/..`, resolved to exactly that connection
    User {
        /// Target identity
        identity: Identity,
        /// Remainder after the identity, without the leading slash
        rest: String,
    },
}

impl Destination {
    /// Parse a destination name.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if let Some(tail) = raw.strip_prefix(USER_PREFIX) {
            let (identity, rest) = match tail.split_once('/') {
                Some((identity, rest)) => (identity, rest),
                None => (tail, ""),
            };
            if identity.is_empty() || crate::types::is_reserved(identity) {
                return Err(RelayError::invalid_destination(raw));
            }
            return Ok(Destination::User {
                identity: Identity::new(identity),
                rest: rest.to_string(),
            });
        }

        let name = raw
            .strip_prefix(TOPIC_PREFIX)
            .or_else(|| raw.strip_prefix(QUEUE_PREFIX));
        match name {
            Some(name) if !name.is_empty() => Ok(Destination::Shared(raw.to_string())),
            _ => Err(RelayError::invalid_destination(raw)),
        }
    }

    /// Whether this is a shared destination.
    pub fn is_shared(&self) -> bool {
        matches!(self, Destination::Shared(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Shared(name) => f.write_str(name),
            Destination::User { identity, rest } if rest.is_empty() => {
                write!(f, "{}{}", USER_PREFIX, identity)
            }
            Destination::User { identity, rest } => write!(f, "{}{}/{}", USER_PREFIX, identity, rest),
        }
    }
}
