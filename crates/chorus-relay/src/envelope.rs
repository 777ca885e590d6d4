//! Envelope codec boundary.
//!
//! Inbound text frames are decoded into [`Envelope`]s before they reach the
//! router, and outbound envelopes are encoded once per fan-out into a shared
//! [`OutboundFrame`]. The `message` field is passed through untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::types::{Identity, Recipient, SYSTEM};

/// The routed unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity, or `SYSTEM` for lifecycle notices
    pub from: Identity,
    /// `ALL`, a peer identity, or a broker destination
    pub to: Recipient,
    /// Opaque payload
    pub message: Value,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(from: Identity, to: impl Into<Recipient>, message: impl Into<Value>) -> Self {
        Self {
            from,
            to: to.into(),
            message: message.into(),
        }
    }

    /// Create a `SYSTEM` notice.
    pub fn system(to: impl Into<Recipient>, text: impl Into<String>) -> Self {
        Self::new(Identity::system(), to, Value::String(text.into()))
    }

    /// Whether this is a lifecycle notice.
    pub fn is_system(&self) -> bool {
        self.from.is_system()
    }

    /// Serialize for delivery.
    pub fn encode(&self) -> Result<OutboundFrame, RelayError> {
        let text = serde_json::to_string(self)?;
        Ok(OutboundFrame::new(text))
    }

    /// Copy of this envelope with a different `to`.
    pub fn readdressed(&self, to: impl Into<Recipient>) -> Self {
        Self {
            from: self.from.clone(),
            to: to.into(),
            message: self.message.clone(),
        }
    }
}

/// An encoded envelope ready for a connection's outbound queue.
///
/// Cloning shares the underlying text, so a broadcast encodes once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    text: Arc<str>,
}

impl OutboundFrame {
    /// Wrap already-encoded text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    /// The encoded text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Decode back into an envelope (used by tests and clients).
    pub fn decode(&self) -> Result<Envelope, RelayError> {
        serde_json::from_str(&self.text).map_err(|e| RelayError::malformed(e.to_string()))
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Wire shape of an envelope sent by a client.
///
/// `from` is accepted but ignored: the sender is always the identity the
/// relay assigned to the connection.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    to: Option<String>,
    message: Option<Value>,
    #[serde(default, rename = "from")]
    _from: Option<Value>,
}

/// Decode an inbound text frame from `sender`.
///
/// JSON objects must carry `to` and `message`. Anything that is not a JSON
/// object is plain text broadcast to `ALL`.
pub fn decode_inbound(sender: &Identity, raw: &str) -> Result<Envelope, RelayError> {
    if !raw.trim_start().starts_with('{') {
        return Ok(Envelope::new(
            sender.clone(),
            Recipient::All,
            Value::String(raw.to_string()),
        ));
    }

    let inbound: InboundEnvelope =
        serde_json::from_str(raw).map_err(|e| RelayError::malformed(e.to_string()))?;

    let to = inbound
        .to
        .ok_or_else(|| RelayError::malformed("missing field `to`"))?;
    let message = inbound
        .message
        .ok_or_else(|| RelayError::malformed("missing field `message`"))?;

    if to.is_empty() {
        return Err(RelayError::malformed("empty `to`"));
    }
    if to == SYSTEM {
        return Err(RelayError::malformed("`SYSTEM` is not addressable"));
    }

    Ok(Envelope::new(sender.clone(), Recipient::parse(&to), message))
}

/// Frames spoken on the broker endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrokerFrame {
    /// Start receiving a shared destination
    Subscribe {
        /// Destination name
        destination: String,
    },
    /// Stop receiving a shared destination
    Unsubscribe {
        /// Destination name
        destination: String,
    },
    /// Publish a payload to a destination
    Publish {
        /// Destination name
        destination: String,
        /// Opaque payload
        message: Value,
    },
}

/// Decode a broker frame.
pub fn decode_broker_frame(raw: &str) -> Result<BrokerFrame, RelayError> {
    serde_json::from_str(raw).map_err(|e| RelayError::malformed(e.to_string()))
}
