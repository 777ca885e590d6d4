//! Server configuration from `CHORUS_*` environment variables.
//!
//! # Environment Variables
//!
//! - `CHORUS_BIND`: listen address. Default: `0.0.0.0:8080`
//! - `CHORUS_MODE`: `direct` or `broker`. Default: `direct`
//! - `CHORUS_SUBSCRIPTIONS`: `implicit` or `explicit` (broker mode). Default: `implicit`
//! - `CHORUS_ECHO`: whether broadcasters receive their own broadcast. Default: `true`
//! - `CHORUS_OUTBOUND_BUFFER`: per-connection outbound queue size. Default: `256`
//! - `CHORUS_NOTIFY_UNDELIVERABLE`: tell senders when a unicast target is gone. Default: `true`
//!
//! # Examples
//!
//! ```bash
//! CHORUS_MODE=broker CHORUS_SUBSCRIPTIONS=explicit cargo run -p chorus-server
//! ```

use chorus_relay::{BrokerConfig, RelayConfig, RouterConfig, SubscriptionMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default per-connection outbound queue size.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Relay operating mode.
///
/// Determines which socket endpoints are mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Plain relay: `{to, message}` envelopes on `/text`.
    #[default]
    Direct,

    /// Plain relay plus the topic broker.
    ///
    /// Enables:
    /// - `/broker` endpoint speaking subscribe/unsubscribe/publish frames
    /// - `/topic/..`, `/queue/..` and `/user/..` destinations on `/text`
    /// - Lifecycle notices on `/topic/presence`
    Broker,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Direct => write!(f, "direct"),
            RelayMode::Broker => write!(f, "broker"),
        }
    }
}

impl RelayMode {
    /// Parse relay mode from a string, rejecting unknown values.
    ///
    /// Valid values (case-insensitive):
    /// - "direct", "plain" -> Direct
    /// - "broker", "stomp", "topic" -> Broker
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "broker" | "stomp" | "topic" => Some(RelayMode::Broker),
            "direct" | "plain" => Some(RelayMode::Direct),
            _ => None,
        }
    }

    /// Check if the topic broker is enabled.
    pub fn broker_enabled(&self) -> bool {
        matches!(self, RelayMode::Broker)
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Relay operating mode
    pub mode: RelayMode,
    /// Shared destination resolution in broker mode
    pub subscriptions: SubscriptionMode,
    /// Whether broadcasters receive their own broadcast
    pub echo: bool,
    /// Per-connection outbound queue size
    pub outbound_buffer: usize,
    /// Whether a unicast to an unknown identity is reported to the sender
    pub notify_undeliverable: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            mode: RelayMode::default(),
            subscriptions: SubscriptionMode::default(),
            echo: true,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            notify_undeliverable: true,
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load server configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind = lookup("CHORUS_BIND").unwrap_or(defaults.bind);
        let mode = match lookup("CHORUS_MODE") {
            Some(raw) => RelayMode::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown CHORUS_MODE, using {}", defaults.mode);
                defaults.mode
            }),
            None => defaults.mode,
        };

        let subscriptions = match lookup("CHORUS_SUBSCRIPTIONS") {
            Some(raw) => SubscriptionMode::from_str(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown CHORUS_SUBSCRIPTIONS, using {}", defaults.subscriptions);
                defaults.subscriptions
            }),
            None => defaults.subscriptions,
        };

        let echo = parse_bool(&lookup, "CHORUS_ECHO", defaults.echo);
        let notify_undeliverable = parse_bool(
            &lookup,
            "CHORUS_NOTIFY_UNDELIVERABLE",
            defaults.notify_undeliverable,
        );

        let outbound_buffer = match lookup("CHORUS_OUTBOUND_BUFFER") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "Invalid CHORUS_OUTBOUND_BUFFER, using {}", DEFAULT_OUTBOUND_BUFFER);
                    DEFAULT_OUTBOUND_BUFFER
                }
            },
            None => defaults.outbound_buffer,
        };

        Self {
            bind,
            mode,
            subscriptions,
            echo,
            outbound_buffer,
            notify_undeliverable,
        }
    }

    /// Relay core configuration derived from this server configuration.
    pub fn relay_config(&self) -> RelayConfig {
        let config =
            RelayConfig::default().with_router(RouterConfig::new().with_echo_broadcasts(self.echo));
        if self.mode.broker_enabled() {
            config.with_broker(BrokerConfig::default().with_mode(self.subscriptions))
        } else {
            config
        }
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Running in {} mode", self.mode);
        info!("Bind address: {}", self.bind);
        info!("Broadcast echo: {}", if self.echo { "on" } else { "off" });
        info!("Outbound buffer: {} frames per connection", self.outbound_buffer);
        info!(
            "Undeliverable notices: {}",
            if self.notify_undeliverable { "enabled" } else { "disabled" }
        );

        if self.mode.broker_enabled() {
            info!("Topic broker: enabled ({} subscriptions)", self.subscriptions);
        } else {
            info!("Topic broker: disabled (direct mode)");
        }
    }

    /// Create a test configuration for direct mode.
    #[cfg(test)]
    pub fn test_direct() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            outbound_buffer: 32,
            ..Self::default()
        }
    }

    /// Create a test configuration for broker mode.
    #[cfg(test)]
    pub fn test_broker() -> Self {
        Self {
            mode: RelayMode::Broker,
            subscriptions: SubscriptionMode::Explicit,
            ..Self::test_direct()
        }
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %raw, "Invalid boolean, using {}", default);
            default
        }
    }
}
