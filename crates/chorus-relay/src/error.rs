//! Error types for the relay core.

use thiserror::Error;

use crate::types::Identity;

/// Relay core errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An identity was inserted into the registry twice.
    ///
    /// The newer handle replaces the older one; this variant only reports
    /// that the allocator invariant was violated.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(Identity),

    /// Unicast target is not currently registered
    #[error("Recipient not found: {0}")]
    RecipientNotFound(Identity),

    /// Inbound payload could not be turned into an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Destination string is outside the supported namespaces
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// The sending session has already been torn down
    #[error("Session closed: {0}")]
    SessionClosed(Identity),

    /// Outbound serialization failed
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Create a new malformed envelope error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create a new invalid destination error.
    pub fn invalid_destination(destination: impl Into<String>) -> Self {
        Self::InvalidDestination(destination.into())
    }

    /// Whether this error was caused by the client's payload.
    ///
    /// These are reported back to the sending connection; everything else
    /// is a server-side condition.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedEnvelope(_)
                | RelayError::InvalidDestination(_)
                | RelayError::RecipientNotFound(_)
        )
    }
}

/// Failure to hand a frame to a single connection.
///
/// Always recovered locally by the router; never propagated to the sender
/// or to other recipients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection's outbound queue is full
    #[error("outbound queue full")]
    ChannelFull,

    /// The connection's writer has gone away
    #[error("outbound queue closed")]
    ChannelClosed,

    /// The envelope could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),
}
