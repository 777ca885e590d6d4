//! Envelope relay over WebSocket.
//!
//! Clients send `{"to": "<identity>|ALL", "message": ...}` or plain text
//! (broadcast) and receive `{"from", "to", "message"}` envelopes.

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

/// Create the text socket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/text", get(text_socket_handler))
        .with_state(state)
}

/// GET /text
async fn text_socket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Text WebSocket connection request");
    ws.on_upgrade(move |socket| session::run(socket, state, Endpoint::Text))
}
