//! Topic broker over WebSocket.
//!
//! Frames are tagged by `type`:
//!
//! ```json
//! {"type": "subscribe", "destination": "/topic/room"}
//! {"type": "unsubscribe", "destination": "/topic/room"}
//! {"type": "publish", "destination": "/user/<identity>/queue/reply", "message": {}}
//! ```
//!
//! Deliveries arrive as ordinary envelopes whose `to` is the destination.
//! Connect and disconnect notices arrive on `/topic/presence`.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::debug;

use super::session::{self, Endpoint};
use crate::server::AppState;

/// Create the broker socket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/broker", get(broker_socket_handler))
        .with_state(state)
}

/// GET /broker
async fn broker_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!("Broker WebSocket connection request");
    ws.on_upgrade(move |socket| session::run(socket, state, Endpoint::Broker))
}
