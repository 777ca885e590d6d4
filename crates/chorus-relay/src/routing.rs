//! Envelope routing.
//!
//! This module provides the `MessageRouter`, which resolves an envelope's
//! recipient against the `ConnectionRegistry` and delivers it.
//!
//! # Routing Logic
//!
//! For each envelope, the router:
//! 1. `to == ALL`: takes a registry snapshot and sends to every entry,
//!    isolating each send so one failure never aborts the rest
//! 2. `to == <identity>`: looks the identity up and sends to that one handle
//! 3. `to == <destination>`: not routable here; destinations belong to the
//!    `TopicBroker`
//!
//! A failed send is logged and counted. It never removes the entry: only the
//! transport's teardown signal does that.
//!
//! # Example
//!
//! ```ignore
//! use chorus_relay::routing::{MessageRouter, RouterConfig};
//!
//! let router = MessageRouter::new(RouterConfig::default(), registry);
//! match router.route(&envelope) {
//!     RouteOutcome::RecipientNotFound(id) => { /* tell the sender */ }
//!     _ => {}
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::envelope::{Envelope, OutboundFrame};
use crate::error::SendError;
use crate::metrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::types::{Identity, Recipient};

/// Configuration for the message router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether a broadcasting peer receives its own broadcast
    pub echo_broadcasts: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            echo_broadcasts: true,
        }
    }
}

impl RouterConfig {
    /// Create a new router configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether broadcasters receive their own broadcasts.
    pub fn with_echo_broadcasts(mut self, echo: bool) -> Self {
        self.echo_broadcasts = echo;
        self
    }
}

/// Tally of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients whose handle accepted the frame
    pub delivered: usize,
    /// Recipients whose send failed
    pub failed: usize,
    /// The failing recipients and why
    pub failures: Vec<(Identity, SendError)>,
}

impl DeliveryReport {
    /// Total recipients attempted.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    fn record_success(&mut self) {
        self.delivered += 1;
    }

    fn record_failure(&mut self, identity: Identity, error: SendError) {
        self.failed += 1;
        self.failures.push((identity, error));
    }
}

/// Result of a routing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Envelope was fanned out to a set of connections
    Broadcast(DeliveryReport),
    /// Envelope was handed to exactly one connection
    Delivered(Identity),
    /// Unicast target is not registered; nothing was sent
    RecipientNotFound(Identity),
    /// Unicast target is registered but its send failed
    SendFailed {
        /// The unicast target
        recipient: Identity,
        /// Why the send failed
        error: SendError,
    },
    /// The router cannot resolve this recipient (broker destinations)
    Unroutable(Recipient),
}

impl RouteOutcome {
    /// Whether at least one connection accepted the envelope.
    pub fn is_delivered(&self) -> bool {
        match self {
            RouteOutcome::Broadcast(report) => report.delivered > 0,
            RouteOutcome::Delivered(_) => true,
            _ => false,
        }
    }
}

/// Broadcast and unicast router over the connection registry.
pub struct MessageRouter {
    /// Router configuration
    config: RouterConfig,
    /// Live connections
    registry: Arc<ConnectionRegistry>,
}

impl MessageRouter {
    /// Create a new message router.
    pub fn new(config: RouterConfig, registry: Arc<ConnectionRegistry>) -> Self {
        info!(
            echo_broadcasts = config.echo_broadcasts,
            "MessageRouter initialized"
        );
        Self { config, registry }
    }

    /// Get the router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Get the registry this router delivers through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Route an envelope to its recipient(s).
    pub fn route(&self, envelope: &Envelope) -> RouteOutcome {
        self.route_excluding(envelope, None)
    }

    /// Route an envelope, skipping one identity on broadcast.
    #[instrument(skip(self, envelope), fields(from = %envelope.from, to = %envelope.to))]
    pub fn route_excluding(&self, envelope: &Envelope, exclude: Option<&Identity>) -> RouteOutcome {
        match &envelope.to {
            Recipient::All => {
                metrics::record_route("broadcast");
                RouteOutcome::Broadcast(self.broadcast(envelope, exclude))
            }
            Recipient::Peer(identity) => {
                metrics::record_route("unicast");
                self.unicast(identity, envelope)
            }
            Recipient::Destination(destination) => {
                debug!(destination = %destination, "Destination envelopes are handled by the broker");
                RouteOutcome::Unroutable(envelope.to.clone())
            }
        }
    }

    /// Deliver to every registered connection.
    ///
    /// Honors `echo_broadcasts` for peer senders; `exclude` is skipped in
    /// addition.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<&Identity>) -> DeliveryReport {
        let skip_sender = !self.config.echo_broadcasts && !envelope.is_system();
        self.deliver_where(envelope, |identity| {
            Some(identity) != exclude && !(skip_sender && *identity == envelope.from)
        })
    }

    /// Deliver to every registered connection accepted by `filter`.
    ///
    /// Takes a snapshot first, so no registry lock is held while sending.
    pub fn deliver_where<F>(&self, envelope: &Envelope, filter: F) -> DeliveryReport
    where
        F: Fn(&Identity) -> bool,
    {
        let targets: Vec<(Identity, Arc<dyn ConnectionHandle>)> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(identity, _)| filter(identity))
            .collect();
        self.fan_out(envelope, targets)
    }

    /// Deliver to a specific set of identities.
    ///
    /// Identities that are no longer registered are skipped; they raced with
    /// their own teardown and are neither delivered nor failed.
    pub fn deliver_to(&self, recipients: &[Identity], envelope: &Envelope) -> DeliveryReport {
        let targets: Vec<(Identity, Arc<dyn ConnectionHandle>)> = recipients
            .iter()
            .filter_map(|identity| match self.registry.lookup(identity) {
                Some(handle) => Some((identity.clone(), handle)),
                None => {
                    debug!(recipient = %identity, "Subscriber no longer registered");
                    None
                }
            })
            .collect();
        self.fan_out(envelope, targets)
    }

    /// Deliver to exactly one identity.
    pub fn unicast(&self, recipient: &Identity, envelope: &Envelope) -> RouteOutcome {
        let handle = match self.registry.lookup(recipient) {
            Some(handle) => handle,
            None => {
                debug!(recipient = %recipient, "Recipient not connected");
                return RouteOutcome::RecipientNotFound(recipient.clone());
            }
        };

        let result = envelope
            .encode()
            .map_err(|e| SendError::Encode(e.to_string()))
            .and_then(|frame| handle.send(frame));

        match result {
            Ok(()) => {
                debug!(recipient = %recipient, "Envelope queued for delivery");
                metrics::record_deliveries(1, 0);
                RouteOutcome::Delivered(recipient.clone())
            }
            Err(error) => {
                warn!(recipient = %recipient, error = %error, "Failed to deliver envelope");
                metrics::record_deliveries(0, 1);
                RouteOutcome::SendFailed {
                    recipient: recipient.clone(),
                    error,
                }
            }
        }
    }

    /// Encode once and send to each target, isolating failures.
    fn fan_out(
        &self,
        envelope: &Envelope,
        targets: Vec<(Identity, Arc<dyn ConnectionHandle>)>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let frame: OutboundFrame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope for fan-out");
                let error = SendError::Encode(e.to_string());
                for (identity, _) in targets {
                    report.record_failure(identity, error.clone());
                }
                metrics::record_deliveries(0, report.failed);
                return report;
            }
        };

        for (identity, handle) in targets {
            match handle.send(frame.clone()) {
                Ok(()) => report.record_success(),
                Err(error) => {
                    warn!(recipient = %identity, error = %error, "Failed to deliver envelope");
                    report.record_failure(identity, error);
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Fan-out complete"
        );
        metrics::record_deliveries(report.delivered, report.failed);
        report
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
