//! Connection lifecycle.
//!
//! The transport drives the relay through two entry points, called exactly
//! once each per physical connection and in this order:
//!
//! ```text
//! on_established(handle) ──► Session { Established }
//!                                   │
//! on_closed(session, reason) ──────►│ Closed (terminal, idempotent)
//! ```
//!
//! Establishment allocates an identity, registers the handle, tells the new
//! peer its identity and announces it to everyone else. Teardown removes the
//! entry synchronously and announces the departure.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use crate::broker::TopicBroker;
use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::identity::IdentityAllocator;
use crate::metrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::routing::{MessageRouter, RouteOutcome};
use crate::types::{CloseReason, ConnectionState, Identity, Recipient};

/// Text of the private notice telling a peer its identity.
pub fn identity_notice(identity: &Identity) -> String {
    format!("Connected as {}", identity)
}

/// Text of the join announcement.
pub fn connected_notice(identity: &Identity) -> String {
    format!("User {} Connected", identity)
}

/// Text of the leave announcement.
pub fn disconnected_notice(identity: &Identity) -> String {
    format!("User {} Disconnected", identity)
}

/// Per-connection lifecycle state.
#[derive(Debug)]
pub struct Session {
    identity: Identity,
    state: AtomicU8,
    connected_at: DateTime<Utc>,
}

impl Session {
    fn new(identity: Identity, connected_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at,
        }
    }

    /// The relay-assigned identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the session is routable.
    pub fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// When the transport established the connection.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Reacts to transport connect/disconnect events.
pub struct LifecycleManager {
    allocator: IdentityAllocator,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    broker: Option<Arc<TopicBroker>>,
}

impl LifecycleManager {
    /// Create a lifecycle manager.
    ///
    /// With a broker attached, notices are published on its system
    /// destination; otherwise they are routed to `ALL`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<MessageRouter>,
        broker: Option<Arc<TopicBroker>>,
    ) -> Self {
        Self {
            allocator: IdentityAllocator::new(),
            registry,
            router,
            broker,
        }
    }

    /// The registry this manager mutates.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// A transport-level connection was established.
    #[instrument(skip(self, handle))]
    pub fn on_established(&self, handle: Arc<dyn ConnectionHandle>) -> Arc<Session> {
        let identity = self.allocator.allocate();
        let connected_at = Utc::now();
        let session = Arc::new(Session::new(identity.clone(), connected_at));

        if let Err(RelayError::DuplicateIdentity(dup)) =
            self.registry.insert_at(identity.clone(), handle, connected_at)
        {
            error!(identity = %dup, "Allocator issued a duplicate identity");
        }
        session.transition(ConnectionState::Connecting, ConnectionState::Established);

        info!(identity = %identity, connections = self.registry.len(), "Session established");
        metrics::record_lifecycle("connected");
        metrics::record_connection_count(self.registry.len());

        let notice = Envelope::system(identity.clone(), identity_notice(&identity));
        if let RouteOutcome::SendFailed { error, .. } = self.router.unicast(&identity, &notice) {
            // The peer may already be gone; its own teardown will follow.
            info!(identity = %identity, error = %error, "Identity notice not delivered");
        }

        self.announce(connected_notice(&identity), Some(&identity));
        session
    }

    /// A transport-level connection was torn down.
    ///
    /// Returns true if this call performed the teardown; repeated calls for
    /// the same session are ignored.
    #[instrument(skip(self, session), fields(identity = %session.identity()))]
    pub fn on_closed(&self, session: &Session, reason: CloseReason) -> bool {
        if !session.transition(ConnectionState::Established, ConnectionState::Closed) {
            // Never established, or already closed.
            session.state.store(ConnectionState::Closed as u8, Ordering::Release);
            return false;
        }

        let identity = session.identity();
        self.registry.remove(identity);
        if let Some(broker) = &self.broker {
            broker.disconnect(identity);
        }

        info!(
            reason = %reason,
            connections = self.registry.len(),
            "Session closed"
        );
        metrics::record_lifecycle("disconnected");
        metrics::record_connection_count(self.registry.len());

        self.announce(disconnected_notice(identity), None);
        true
    }

    /// Live identities for the directory endpoint.
    pub fn list_identities(&self) -> Vec<Identity> {
        self.registry.list_identities()
    }

    fn announce(&self, text: String, exclude: Option<&Identity>) -> RouteOutcome {
        match &self.broker {
            Some(broker) => broker.publish_system(text, exclude),
            None => self
                .router
                .route_excluding(&Envelope::system(Recipient::All, text), exclude),
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("issued", &self.allocator.issued())
            .field("registry", &self.registry)
            .field("broker", &self.broker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, SubscriptionMode, PRESENCE_DESTINATION};
    use crate::routing::RouterConfig;
    use crate::testing::RecordingHandle;

    fn manager(with_broker: bool) -> LifecycleManager {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(RouterConfig::default(), Arc::clone(&registry)));
        let broker = with_broker.then(|| {
            Arc::new(TopicBroker::new(
                BrokerConfig::default().with_mode(SubscriptionMode::Explicit),
                Arc::clone(&router),
            ))
        });
        LifecycleManager::new(registry, router, broker)
    }

    fn connect(mgr: &LifecycleManager) -> (Arc<Session>, RecordingHandle) {
        let handle = RecordingHandle::new();
        let session = mgr.on_established(Arc::new(handle.clone()));
        (session, handle)
    }

    #[test]
    fn test_establish_registers_and_notifies_self() {
        let mgr = manager(false);
        let (session, handle) = connect(&mgr);

        assert_eq!(session.state(), ConnectionState::Established);
        assert!(mgr.registry().contains(session.identity()));

        // Only the private identity notice; the join announcement skips the
        // joining peer.
        let got = handle.received();
        assert_eq!(got.len(), 1);
        assert!(got[0].is_system());
        assert_eq!(got[0].to, Recipient::Peer(session.identity().clone()));
        assert_eq!(got[0].message, identity_notice(session.identity()));
    }

    #[test]
    fn test_session_and_directory_share_connect_time() {
        let mgr = manager(false);
        let (session, _) = connect(&mgr);

        let peers = mgr.registry().list_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].connected_at, session.connected_at());
    }

    #[test]
    fn test_establish_announces_to_existing_peers() {
        let mgr = manager(false);
        let (_a, ha) = connect(&mgr);
        let (b, _hb) = connect(&mgr);

        let got = ha.received();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].to, Recipient::All);
        assert_eq!(got[1].message, connected_notice(b.identity()));
    }

    #[test]
    fn test_close_removes_and_announces() {
        let mgr = manager(false);
        let (a, ha) = connect(&mgr);
        let (b, hb) = connect(&mgr);

        assert!(mgr.on_closed(&b, CloseReason::Normal));
        assert_eq!(b.state(), ConnectionState::Closed);
        assert!(!mgr.registry().contains(b.identity()));

        let last = ha.received().pop().unwrap();
        assert!(last.is_system());
        assert_eq!(last.message, disconnected_notice(b.identity()));
        // The departed peer gets nothing after its teardown.
        assert_eq!(hb.received().len(), 1);
        assert!(mgr.registry().contains(a.identity()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mgr = manager(false);
        let (_a, ha) = connect(&mgr);
        let (b, _) = connect(&mgr);
        let before = ha.received().len();

        assert!(mgr.on_closed(&b, CloseReason::Error("reset".into())));
        assert!(!mgr.on_closed(&b, CloseReason::Timeout));
        assert!(!mgr.on_closed(&b, CloseReason::Normal));

        let disconnects = ha.received()[before..]
            .iter()
            .filter(|e| e.message == disconnected_notice(b.identity()))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(b.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_reconnect_gets_new_identity() {
        let mgr = manager(false);
        let (first, _) = connect(&mgr);
        mgr.on_closed(&first, CloseReason::Normal);
        let (second, _) = connect(&mgr);

        assert_ne!(first.identity(), second.identity());
        assert_eq!(first.state(), ConnectionState::Closed);
        assert_eq!(mgr.list_identities(), vec![second.identity().clone()]);
    }

    #[test]
    fn test_notices_use_broker_when_attached() {
        let mgr = manager(true);
        let (_a, ha) = connect(&mgr);
        let (b, _) = connect(&mgr);

        let join = ha.received().pop().unwrap();
        assert_eq!(join.to.to_string(), PRESENCE_DESTINATION);
        assert_eq!(join.message, connected_notice(b.identity()));
    }

    #[test]
    fn test_close_clears_broker_subscriptions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(RouterConfig::default(), Arc::clone(&registry)));
        let broker = Arc::new(TopicBroker::new(
            BrokerConfig::default().with_mode(SubscriptionMode::Explicit),
            Arc::clone(&router),
        ));
        let mgr = LifecycleManager::new(registry, router, Some(Arc::clone(&broker)));

        let (a, _) = connect(&mgr);
        broker.subscribe(a.identity(), "/topic/x").unwrap();
        assert_eq!(broker.subscriptions().destination_count(), 1);

        mgr.on_closed(&a, CloseReason::Normal);
        assert_eq!(broker.subscriptions().destination_count(), 0);
    }

    #[test]
    fn test_failed_notice_does_not_abort_establish() {
        let mgr = manager(false);
        let handle = RecordingHandle::failing(crate::error::SendError::ChannelClosed);
        let session = mgr.on_established(Arc::new(handle));
        assert!(session.is_established());
        assert!(mgr.registry().contains(session.identity()));
    }
}
