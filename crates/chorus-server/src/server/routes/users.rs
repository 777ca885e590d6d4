//! Connected-user directory.

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

/// One entry of `GET /users`.
#[derive(Debug, Serialize)]
pub struct UserEntry {
    /// The connection's identity
    pub name: String,
    pub connected_at: DateTime<Utc>,
}

/// Create the directory router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", get(list_users_handler))
        .with_state(state)
}

/// GET /users
///
/// Returns `[{"name": "<identity>", "connected_at": "..."}]`, oldest first.
async fn list_users_handler(State(state): State<Arc<AppState>>) -> Json<Vec<UserEntry>> {
    let users = state
        .relay
        .list_peers()
        .into_iter()
        .map(|peer| UserEntry {
            name: peer.identity.to_string(),
            connected_at: peer.connected_at,
        })
        .collect();
    Json(users)
}
