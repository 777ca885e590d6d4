//! Connection Registry implementation.
//!
//! Tracks live connections by identity for message routing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::handle::ConnectionHandle;
use crate::error::RelayError;
use crate::types::Identity;

/// Connection state stored in the registry.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Channel to deliver frames to this connection
    handle: Arc<dyn ConnectionHandle>,
    /// When the connection was registered
    connected_at: DateTime<Utc>,
}

impl ConnectionEntry {
    /// Create a new entry registered at `connected_at`.
    pub fn new(handle: Arc<dyn ConnectionHandle>, connected_at: DateTime<Utc>) -> Self {
        Self {
            handle,
            connected_at,
        }
    }

    /// The delivery handle.
    pub fn handle(&self) -> Arc<dyn ConnectionHandle> {
        Arc::clone(&self.handle)
    }

    /// Registration time.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// Peer identity
    pub identity: Identity,
    /// Registration time
    pub connected_at: DateTime<Utc>,
}

/// Registry for tracking live connections.
///
/// Thread-safe registry that maps identities to connection entries.
/// Uses DashMap for concurrent access without a registry-wide lock; every
/// operation is atomic with respect to the others.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a connection is established:
/// let (handle, rx) = ChannelHandle::channel(256);
/// registry.insert(identity.clone(), Arc::new(handle))?;
///
/// // When routing a broadcast:
/// for (id, handle) in registry.snapshot() {
///     let _ = handle.send(frame.clone());
/// }
///
/// // When a connection closes:
/// registry.remove(&identity);
/// ```
pub struct ConnectionRegistry {
    /// Map of identity to connection entry
    connections: DashMap<Identity, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection.
    ///
    /// An existing entry for the same identity means the allocator handed out
    /// a duplicate. The entry is replaced so the registry keeps exactly one
    /// entry per identity, and `DuplicateIdentity` is returned for the caller
    /// to report.
    pub fn insert(
        &self,
        identity: Identity,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Result<(), RelayError> {
        self.insert_at(identity, handle, Utc::now())
    }

    /// Register a connection with an explicit registration time.
    #[instrument(skip(self, handle, connected_at), fields(identity = %identity))]
    pub fn insert_at(
        &self,
        identity: Identity,
        handle: Arc<dyn ConnectionHandle>,
        connected_at: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        let entry = ConnectionEntry::new(handle, connected_at);
        match self.connections.insert(identity.clone(), entry) {
            Some(_) => {
                warn!("Replaced existing registration for duplicate identity");
                Err(RelayError::DuplicateIdentity(identity))
            }
            None => {
                debug!("Registered new connection");
                Ok(())
            }
        }
    }

    /// Unregister a connection.
    ///
    /// Idempotent: removing an unknown identity returns `None`.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn remove(&self, identity: &Identity) -> Option<Arc<dyn ConnectionHandle>> {
        let removed = self.connections.remove(identity);
        if removed.is_some() {
            debug!("Unregistered connection");
        } else {
            debug!("Connection was not registered");
        }
        removed.map(|(_, entry)| entry.handle)
    }

    /// Look up the handle for an identity.
    pub fn lookup(&self, identity: &Identity) -> Option<Arc<dyn ConnectionHandle>> {
        self.connections.get(identity).map(|entry| entry.handle())
    }

    /// Check if an identity is currently registered.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.connections.contains_key(identity)
    }

    /// Get the number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Point-in-time copy of every entry.
    ///
    /// Handles are cloned out, so callers iterate and deliver without holding
    /// any shard lock. Order is unspecified.
    pub fn snapshot(&self) -> Vec<(Identity, Arc<dyn ConnectionHandle>)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle()))
            .collect()
    }

    /// List all live identities.
    ///
    /// Read-only; safe to call concurrently with everything else.
    pub fn list_identities(&self) -> Vec<Identity> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// List live peers with their registration time, oldest first.
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .connections
            .iter()
            .map(|entry| PeerInfo {
                identity: entry.key().clone(),
                connected_at: entry.value().connected_at(),
            })
            .collect();
        peers.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        peers
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
