//! Connection handles.

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::OutboundFrame;
use crate::error::SendError;

/// A live bidirectional channel the relay can deliver frames to.
///
/// Implementations must not block: a slow peer is reported as
/// [`SendError::ChannelFull`] rather than stalling the caller.
pub trait ConnectionHandle: Send + Sync + fmt::Debug {
    /// Hand a frame to the connection's writer.
    fn send(&self, frame: OutboundFrame) -> Result<(), SendError>;

    /// Whether the writer side has gone away.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Handle backed by a bounded mpsc queue drained by the socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    sender: mpsc::Sender<OutboundFrame>,
}

impl ChannelHandle {
    /// Create a handle and the receiver the writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Wrap an existing sender.
    pub fn new(sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self { sender }
    }
}

impl ConnectionHandle for ChannelHandle {
    fn send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Outbound channel full");
                Err(SendError::ChannelFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound channel closed, connection may have dropped");
                Err(SendError::ChannelClosed)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
