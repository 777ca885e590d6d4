//! Fake connection handles for unit tests.

use std::sync::{Arc, Mutex};

use crate::envelope::{Envelope, OutboundFrame};
use crate::error::SendError;
use crate::registry::ConnectionHandle;

/// Records every frame it is handed, or fails every send.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandle {
    frames: Arc<Mutex<Vec<OutboundFrame>>>,
    fail_with: Option<SendError>,
}

impl RecordingHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: SendError) -> Self {
        Self {
            frames: Arc::default(),
            fail_with: Some(error),
        }
    }

    pub fn shared() -> Arc<dyn ConnectionHandle> {
        Arc::new(Self::new())
    }

    /// Number of frames handed to this connection, decodable or not.
    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| frame.decode().unwrap())
            .collect()
    }
}

impl ConnectionHandle for RecordingHandle {
    fn send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}
