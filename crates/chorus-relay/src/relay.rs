//! The assembled relay.
//!
//! `Relay` wires the registry, router, optional broker and lifecycle
//! manager together and exposes the handful of calls a transport needs.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::broker::{BrokerConfig, TopicBroker};
use crate::envelope::{decode_broker_frame, decode_inbound, BrokerFrame, Envelope};
use crate::error::RelayError;
use crate::lifecycle::{LifecycleManager, Session};
use crate::registry::{ConnectionHandle, ConnectionRegistry, PeerInfo};
use crate::routing::{MessageRouter, RouteOutcome, RouterConfig};
use crate::types::{CloseReason, Identity, Recipient};

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Router settings
    pub router: RouterConfig,
    /// Broker settings; `None` runs the plain relay
    pub broker: Option<BrokerConfig>,
}

impl RelayConfig {
    /// Enable the topic broker.
    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set the router configuration.
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }
}

/// What a broker frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerReply {
    /// A publish was routed
    Routed(RouteOutcome),
    /// A subscribe was applied; `added` is false if already subscribed
    Subscribed {
        /// Destination name
        destination: String,
        /// Whether the subscription is new
        added: bool,
    },
    /// An unsubscribe was applied
    Unsubscribed {
        /// Destination name
        destination: String,
        /// Whether a subscription was removed
        removed: bool,
    },
}

/// Registry, router, broker and lifecycle behind one handle.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    broker: Option<Arc<TopicBroker>>,
    lifecycle: LifecycleManager,
}

impl Relay {
    /// Build a relay from its configuration.
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(config.router, Arc::clone(&registry)));
        let broker = config
            .broker
            .map(|cfg| Arc::new(TopicBroker::new(cfg, Arc::clone(&router))));
        let lifecycle = LifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            broker.clone(),
        );

        Self {
            registry,
            router,
            broker,
            lifecycle,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn broker(&self) -> Option<&Arc<TopicBroker>> {
        self.broker.as_ref()
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Transport established a connection.
    pub fn connect(&self, handle: Arc<dyn ConnectionHandle>) -> Arc<Session> {
        self.lifecycle.on_established(handle)
    }

    /// Transport tore a connection down. Idempotent.
    pub fn disconnect(&self, session: &Session, reason: CloseReason) -> bool {
        self.lifecycle.on_closed(session, reason)
    }

    /// Decode and route an inbound text frame from `session`.
    ///
    /// Destination envelopes go through the broker; without one they are
    /// rejected as an invalid destination.
    #[instrument(skip(self, session, raw), fields(from = %session.identity()))]
    pub fn dispatch(&self, session: &Session, raw: &str) -> Result<RouteOutcome, RelayError> {
        ensure_established(session)?;
        let envelope = decode_inbound(session.identity(), raw)?;
        let outcome = match &self.broker {
            Some(broker) => broker.route(&envelope)?,
            None => self.router.route(&envelope),
        };

        match outcome {
            RouteOutcome::Unroutable(to) => Err(RelayError::invalid_destination(to.to_string())),
            outcome => {
                debug!(outcome = ?outcome, "Dispatched");
                Ok(outcome)
            }
        }
    }

    /// Decode and apply a broker frame from `session`.
    #[instrument(skip(self, session, raw), fields(from = %session.identity()))]
    pub fn dispatch_broker(&self, session: &Session, raw: &str) -> Result<BrokerReply, RelayError> {
        let broker = self
            .broker
            .as_ref()
            .ok_or_else(|| RelayError::malformed("broker is not enabled"))?;
        ensure_established(session)?;
        let identity = session.identity();

        match decode_broker_frame(raw)? {
            BrokerFrame::Subscribe { destination } => {
                let added = broker.subscribe(identity, &destination)?;
                // Teardown marks the session closed before clearing its
                // subscriptions, so one of the two sees the other.
                if !session.is_established() {
                    broker.unsubscribe(identity, &destination)?;
                    return Err(RelayError::SessionClosed(identity.clone()));
                }
                Ok(BrokerReply::Subscribed { destination, added })
            }
            BrokerFrame::Unsubscribe { destination } => {
                let removed = broker.unsubscribe(identity, &destination)?;
                Ok(BrokerReply::Unsubscribed {
                    destination,
                    removed,
                })
            }
            BrokerFrame::Publish {
                destination,
                message,
            } => {
                let envelope = Envelope::new(
                    identity.clone(),
                    Recipient::Destination(destination.clone()),
                    message,
                );
                Ok(BrokerReply::Routed(broker.publish(&destination, &envelope)?))
            }
        }
    }

    /// Send a `SYSTEM` notice to one connection.
    pub fn notify(&self, identity: &Identity, text: impl Into<String>) -> RouteOutcome {
        self.router
            .unicast(identity, &Envelope::system(identity.clone(), text))
    }

    /// Live identities.
    pub fn list_identities(&self) -> Vec<Identity> {
        self.lifecycle.list_identities()
    }

    /// Live identities with their connect times.
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.registry.list_peers()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

fn ensure_established(session: &Session) -> Result<(), RelayError> {
    if session.is_established() {
        Ok(())
    } else {
        Err(RelayError::SessionClosed(session.identity().clone()))
    }
}

/// Text of the `SYSTEM` notice owed to a sender whose unicast went nowhere.
///
/// `None` when the result needs no notice.
pub fn undeliverable_notice(result: &Result<RouteOutcome, RelayError>) -> Option<String> {
    match result {
        Ok(RouteOutcome::RecipientNotFound(missing)) | Err(RelayError::RecipientNotFound(missing)) => {
            Some(format!("User {} not found", missing))
        }
        Ok(RouteOutcome::SendFailed { recipient, .. }) => {
            Some(format!("User {} could not be reached", recipient))
        }
        _ => None,
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
