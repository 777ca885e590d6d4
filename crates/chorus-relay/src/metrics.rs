//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one, every helper is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("chorus-relay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for envelopes routed.
pub fn envelopes_routed() -> Counter<u64> {
    meter()
        .u64_counter("relay.envelopes.routed")
        .with_description("Total envelopes routed")
        .with_unit("envelope")
        .build()
}

/// Counter for per-recipient deliveries.
pub fn deliveries() -> Counter<u64> {
    meter()
        .u64_counter("relay.deliveries")
        .with_description("Per-recipient delivery attempts")
        .with_unit("delivery")
        .build()
}

/// Counter for lifecycle transitions.
pub fn lifecycle_events() -> Counter<u64> {
    meter()
        .u64_counter("relay.lifecycle.events")
        .with_description("Connection lifecycle events (connects and disconnects)")
        .with_unit("event")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for live connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("relay.connections.active")
        .with_description("Current number of registered connections")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record an envelope being routed (`broadcast`, `unicast`, `topic`, `user`).
pub fn record_route(kind: &'static str) {
    envelopes_routed().add(1, &[KeyValue::new("kind", kind)]);
}

/// Record a batch of delivery attempts.
pub fn record_deliveries(delivered: usize, failed: usize) {
    if delivered > 0 {
        deliveries().add(delivered as u64, &[KeyValue::new("result", "success")]);
    }
    if failed > 0 {
        deliveries().add(failed as u64, &[KeyValue::new("result", "failure")]);
    }
}

/// Record a lifecycle event (`connected` or `disconnected`).
pub fn record_lifecycle(event: &'static str) {
    lifecycle_events().add(1, &[KeyValue::new("event", event)]);
}

/// Record the current connection count.
pub fn record_connection_count(count: usize) {
    connections_active().record(count as i64, &[]);
}
