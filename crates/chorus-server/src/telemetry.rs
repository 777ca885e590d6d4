//! Logging bootstrap for Chorus Server.
//!
//! Both initializers install a `tracing-subscriber` registry with an
//! `EnvFilter` read from `RUST_LOG`. Relay metrics use the global
//! OpenTelemetry meter and are no-ops until a meter provider is installed.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,chorus_server=debug,chorus_relay=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize structured JSON logging for deployments.
///
/// # Configuration
///
/// Environment variables:
/// - `RUST_LOG`: Log filter (default: `info,chorus_server=debug,chorus_relay=debug`)
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized");

    Ok(())
}

/// Initialize human-readable logging for local development.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");

    Ok(())
}

/// Flush logging before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
