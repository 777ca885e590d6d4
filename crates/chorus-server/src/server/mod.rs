use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chorus_relay::Relay;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

mod routes;

/// Server application state
pub struct AppState {
    /// The relay core
    pub relay: Relay,
    /// Effective configuration
    pub config: ServerConfig,
    /// Fires when the server is shutting down; open sockets close on it
    pub stop_token: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, stop_token: CancellationToken) -> Self {
        Self {
            relay: Relay::new(config.relay_config()),
            config,
            stop_token,
        }
    }
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn start(config: ServerConfig) -> Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.bind))?;

    let stop_token = CancellationToken::new();
    let state = Arc::new(AppState::new(config, stop_token.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let signal_token = stop_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        signal_token.cancel();
    });

    serve(listener, state, stop_token).await
}

/// Serve the router on a bound listener until `stop_token` fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    stop_token: CancellationToken,
) -> Result<()> {
    let app = create_router(state);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    Ok(())
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .merge(routes::text::router(state.clone()))
        .merge(routes::users::router(state.clone()));

    if state.config.mode.broker_enabled() {
        router = router.merge(routes::broker::router(state.clone()));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// Health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "chorus-server",
            "version": env!("CARGO_PKG_VERSION"),
            "mode": state.config.mode,
            "connections": state.relay.connection_count()
        })),
    )
}
