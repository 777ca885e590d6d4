//! Topic Broker: named destinations over the connection registry.
//!
//! Generalizes plain routing to destinations:
//! - `/user/<identity>/..` resolves to exactly that connection (unicast)
//! - `/topic/..` and `/queue/..` are shared destinations (fan-out)
//!
//! ## Subscription modes
//!
//! - **Implicit** (default): every live connection is subscribed to every
//!   shared destination, so a publish reaches the whole registry.
//! - **Explicit**: a shared publish reaches only identities that subscribed.
//!   The presence destination stays implicit so connect/disconnect notices
//!   reach everybody in either mode.
//!
//! Delivery, failure isolation and snapshot discipline are the router's.

pub mod destination;
pub mod subscriptions;

pub use destination::{Destination, PRESENCE_DESTINATION, QUEUE_PREFIX, TOPIC_PREFIX, USER_PREFIX};
pub use subscriptions::SubscriptionRegistry;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::metrics;
use crate::routing::{MessageRouter, RouteOutcome};
use crate::types::{Identity, Recipient};

/// How shared destinations resolve their subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    /// Every live connection receives every shared publish.
    #[default]
    Implicit,
    /// Only explicit subscribers receive shared publishes.
    Explicit,
}

impl SubscriptionMode {
    /// Parse a subscription mode from a string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "implicit" | "all" => Some(SubscriptionMode::Implicit),
            "explicit" | "selective" => Some(SubscriptionMode::Explicit),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionMode::Implicit => write!(f, "implicit"),
            SubscriptionMode::Explicit => write!(f, "explicit"),
        }
    }
}

/// Configuration for the topic broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Subscription resolution for shared destinations
    pub mode: SubscriptionMode,
    /// Destination carrying lifecycle notices
    pub system_destination: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: SubscriptionMode::default(),
            system_destination: PRESENCE_DESTINATION.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Set the subscription mode.
    pub fn with_mode(mut self, mode: SubscriptionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Publish/subscribe front end over the message router.
pub struct TopicBroker {
    config: BrokerConfig,
    router: Arc<MessageRouter>,
    subscriptions: SubscriptionRegistry,
}

impl TopicBroker {
    /// Create a new topic broker.
    pub fn new(config: BrokerConfig, router: Arc<MessageRouter>) -> Self {
        info!(
            mode = %config.mode,
            system_destination = %config.system_destination,
            "TopicBroker initialized"
        );
        Self {
            config,
            router,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    /// Get the broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Get the explicit subscription sets.
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Subscribe a live connection to a destination.
    ///
    /// User destinations are implicitly subscribed and return `Ok(false)`.
    pub fn subscribe(&self, identity: &Identity, destination: &str) -> Result<bool, RelayError> {
        match Destination::parse(destination)? {
            Destination::User { .. } => Ok(false),
            Destination::Shared(name) => {
                if !self.router.registry().contains(identity) {
                    return Err(RelayError::RecipientNotFound(identity.clone()));
                }
                Ok(self.subscriptions.subscribe(&name, identity))
            }
        }
    }

    /// Unsubscribe a connection from a destination.
    pub fn unsubscribe(&self, identity: &Identity, destination: &str) -> Result<bool, RelayError> {
        match Destination::parse(destination)? {
            Destination::User { .. } => Ok(false),
            Destination::Shared(name) => Ok(self.subscriptions.unsubscribe(&name, identity)),
        }
    }

    /// Drop every explicit subscription of a closed connection.
    pub fn disconnect(&self, identity: &Identity) -> usize {
        let removed = self.subscriptions.unsubscribe_all(identity);
        if removed > 0 {
            debug!(identity = %identity, removed, "Cleared subscriptions");
        }
        removed
    }

    /// Publish an envelope to a destination.
    ///
    /// The delivered envelope's `to` is the destination name.
    pub fn publish(&self, destination: &str, envelope: &Envelope) -> Result<RouteOutcome, RelayError> {
        self.publish_excluding(destination, envelope, None)
    }

    /// Publish, skipping one identity on shared fan-out.
    #[instrument(skip(self, envelope, exclude), fields(from = %envelope.from))]
    pub fn publish_excluding(
        &self,
        destination: &str,
        envelope: &Envelope,
        exclude: Option<&Identity>,
    ) -> Result<RouteOutcome, RelayError> {
        let parsed = Destination::parse(destination)?;
        let addressed = envelope.readdressed(Recipient::Destination(parsed.to_string()));

        match parsed {
            Destination::User { identity, .. } => {
                metrics::record_route("user");
                Ok(self.router.unicast(&identity, &addressed))
            }
            Destination::Shared(name) => {
                metrics::record_route("topic");
                let report = if self.is_implicit(&name) {
                    self.router.broadcast(&addressed, exclude)
                } else {
                    let skip_sender =
                        !self.router.config().echo_broadcasts && !addressed.is_system();
                    let recipients: Vec<Identity> = self
                        .subscriptions
                        .subscribers(&name)
                        .into_iter()
                        .filter(|id| Some(id) != exclude && !(skip_sender && *id == addressed.from))
                        .collect();
                    self.router.deliver_to(&recipients, &addressed)
                };
                Ok(RouteOutcome::Broadcast(report))
            }
        }
    }

    /// Publish a `SYSTEM` notice on the system destination.
    pub fn publish_system(&self, text: impl Into<String>, exclude: Option<&Identity>) -> RouteOutcome {
        let destination = self.config.system_destination.clone();
        let envelope = Envelope::system(Recipient::Destination(destination.clone()), text);
        match self.publish_excluding(&destination, &envelope, exclude) {
            Ok(outcome) => outcome,
            // A misconfigured system destination still reaches everybody.
            Err(_) => RouteOutcome::Broadcast(self.router.broadcast(&envelope, exclude)),
        }
    }

    /// Route a plain envelope, sending destination envelopes through the broker.
    pub fn route(&self, envelope: &Envelope) -> Result<RouteOutcome, RelayError> {
        match &envelope.to {
            Recipient::Destination(destination) => self.publish(destination, envelope),
            _ => Ok(self.router.route(envelope)),
        }
    }

    fn is_implicit(&self, name: &str) -> bool {
        self.config.mode == SubscriptionMode::Implicit || name == self.config.system_destination
    }
}

impl fmt::Debug for TopicBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBroker")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::routing::RouterConfig;
    use crate::testing::RecordingHandle;
    use serde_json::json;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        broker: TopicBroker,
    }

    fn fixture(mode: SubscriptionMode) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(RouterConfig::default(), Arc::clone(&registry)));
        let broker = TopicBroker::new(BrokerConfig::default().with_mode(mode), router);
        Fixture { registry, broker }
    }

    fn add(fx: &Fixture, name: &str) -> (Identity, RecordingHandle) {
        let id = Identity::new(name);
        let handle = RecordingHandle::new();
        fx.registry.insert(id.clone(), Arc::new(handle.clone())).unwrap();
        (id, handle)
    }

    #[test]
    fn test_subscription_mode_parse() {
        assert_eq!(SubscriptionMode::from_str("IMPLICIT"), Some(SubscriptionMode::Implicit));
        assert_eq!(SubscriptionMode::from_str("explicit"), Some(SubscriptionMode::Explicit));
        assert_eq!(SubscriptionMode::from_str("nope"), None);
        assert_eq!(SubscriptionMode::Explicit.to_string(), "explicit");
    }

    #[test]
    fn test_implicit_topic_reaches_everyone() {
        let fx = fixture(SubscriptionMode::Implicit);
        let (a, ha) = add(&fx, "a");
        let (_, hb) = add(&fx, "b");

        let env = Envelope::new(a.clone(), Recipient::All, json!("news"));
        let outcome = fx.broker.publish("/topic/news", &env).unwrap();

        assert!(matches!(outcome, RouteOutcome::Broadcast(ref r) if r.delivered == 2));
        let got = hb.received();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].to.to_string(), "/topic/news");
        assert_eq!(got[0].from, a);
        assert_eq!(ha.received().len(), 1);
    }

    #[test]
    fn test_explicit_topic_reaches_subscribers_only() {
        let fx = fixture(SubscriptionMode::Explicit);
        let (a, ha) = add(&fx, "a");
        let (b, hb) = add(&fx, "b");
        let (_, hc) = add(&fx, "c");

        assert!(fx.broker.subscribe(&b, "/topic/news").unwrap());

        let env = Envelope::new(a, Recipient::All, json!("news"));
        let outcome = fx.broker.publish("/topic/news", &env).unwrap();

        assert!(matches!(outcome, RouteOutcome::Broadcast(ref r) if r.delivered == 1));
        assert!(ha.received().is_empty());
        assert_eq!(hb.received().len(), 1);
        assert!(hc.received().is_empty());

        assert!(fx.broker.unsubscribe(&b, "/topic/news").unwrap());
        let env = Envelope::new(Identity::new("a"), Recipient::All, json!("again"));
        fx.broker.publish("/topic/news", &env).unwrap();
        assert_eq!(hb.received().len(), 1);
    }

    #[test]
    fn test_presence_destination_is_always_implicit() {
        let fx = fixture(SubscriptionMode::Explicit);
        let (_, ha) = add(&fx, "a");
        let (_, hb) = add(&fx, "b");

        let outcome = fx.broker.publish_system("User z Connected", None);
        assert!(matches!(outcome, RouteOutcome::Broadcast(ref r) if r.delivered == 2));
        let got = ha.received();
        assert_eq!(got[0].to.to_string(), PRESENCE_DESTINATION);
        assert!(got[0].is_system());
        assert_eq!(hb.received().len(), 1);
    }

    #[test]
    fn test_user_destination_is_unicast() {
        let fx = fixture(SubscriptionMode::Implicit);
        let (a, ha) = add(&fx, "a");
        let (_, hb) = add(&fx, "b");

        let env = Envelope::new(a, Recipient::All, json!("reply"));
        let outcome = fx.broker.publish("/user/b/queue/reply", &env).unwrap();

        assert_eq!(outcome, RouteOutcome::Delivered(Identity::new("b")));
        assert!(ha.received().is_empty());
        let got = hb.received();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].to.to_string(), "/user/b/queue/reply");
    }

    #[test]
    fn test_user_destination_not_found() {
        let fx = fixture(SubscriptionMode::Implicit);
        let (a, _) = add(&fx, "a");

        let env = Envelope::new(a, Recipient::All, json!("x"));
        assert_eq!(
            fx.broker.publish("/user/ghost/queue/x", &env).unwrap(),
            RouteOutcome::RecipientNotFound(Identity::new("ghost"))
        );
    }

    #[test]
    fn test_invalid_destination() {
        let fx = fixture(SubscriptionMode::Implicit);
        let (a, _) = add(&fx, "a");
        let env = Envelope::new(a.clone(), Recipient::All, json!("x"));

        assert!(matches!(
            fx.broker.publish("/app/x", &env),
            Err(RelayError::InvalidDestination(_))
        ));
        assert!(fx.broker.subscribe(&a, "nowhere").is_err());
    }

    #[test]
    fn test_subscribe_requires_live_connection() {
        let fx = fixture(SubscriptionMode::Explicit);
        assert!(matches!(
            fx.broker.subscribe(&Identity::new("ghost"), "/topic/x"),
            Err(RelayError::RecipientNotFound(_))
        ));
    }

    #[test]
    fn test_user_subscription_is_implicit() {
        let fx = fixture(SubscriptionMode::Explicit);
        let (a, _) = add(&fx, "a");
        assert!(!fx.broker.subscribe(&a, "/user/a/queue/x").unwrap());
        assert_eq!(fx.broker.subscriptions().destination_count(), 0);
    }

    #[test]
    fn test_disconnect_clears_subscriptions() {
        let fx = fixture(SubscriptionMode::Explicit);
        let (a, _) = add(&fx, "a");
        fx.broker.subscribe(&a, "/topic/x").unwrap();
        fx.broker.subscribe(&a, "/queue/y").unwrap();

        assert_eq!(fx.broker.disconnect(&a), 2);
        assert!(fx.broker.subscriptions().destinations_for(&a).is_empty());
    }

    #[test]
    fn test_route_dispatches_by_recipient() {
        let fx = fixture(SubscriptionMode::Implicit);
        let (a, _) = add(&fx, "a");
        let (b, hb) = add(&fx, "b");

        let unicast = Envelope::new(a.clone(), b.clone(), json!("direct"));
        assert_eq!(fx.broker.route(&unicast).unwrap(), RouteOutcome::Delivered(b));

        let topic = Envelope::new(a, Recipient::Destination("/topic/t".into()), json!("t"));
        assert!(fx.broker.route(&topic).unwrap().is_delivered());
        assert_eq!(hb.received().len(), 2);
    }
}
