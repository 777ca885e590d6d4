use anyhow::Result;
use clap::Parser;
use tracing::info;

mod config;
mod server;
mod telemetry;

use config::{RelayMode, ServerConfig};

/// Chorus WebSocket relay
#[derive(Parser, Debug)]
#[command(name = "chorus-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Listen address (overrides CHORUS_BIND)
    #[arg(short, long)]
    bind: Option<String>,

    /// Relay mode: direct or broker (overrides CHORUS_MODE)
    #[arg(short, long)]
    mode: Option<String>,

    /// Broker subscriptions: implicit or explicit (overrides CHORUS_SUBSCRIPTIONS)
    #[arg(long)]
    subscriptions: Option<String>,

    /// Deliver broadcasts back to their sender (overrides CHORUS_ECHO)
    #[arg(long)]
    echo: Option<bool>,

    /// Human-readable logs instead of JSON
    #[arg(long, env = "CHORUS_PRETTY_LOGS")]
    pretty: bool,
}

impl Cli {
    /// Apply command line overrides on top of the environment.
    fn apply(self, mut config: ServerConfig) -> Result<ServerConfig> {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(raw) = self.mode {
            config.mode =
                RelayMode::parse(&raw).ok_or_else(|| anyhow::anyhow!("unknown relay mode: {}", raw))?;
        }
        if let Some(raw) = self.subscriptions {
            config.subscriptions = chorus_relay::SubscriptionMode::from_str(&raw)
                .ok_or_else(|| anyhow::anyhow!("unknown subscription mode: {}", raw))?;
        }
        if let Some(echo) = self.echo {
            config.echo = echo;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.pretty {
        telemetry::init_local()
    } else {
        telemetry::init()
    };
    telemetry.map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    info!("Chorus Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = cli.apply(ServerConfig::from_env())?;
    config.log_config();

    let result = server::start(config).await;

    telemetry::shutdown();
    result
}
