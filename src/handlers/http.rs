//! HTTP handlers: health.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use crate::models::connection::Heartbeat;
use crate::services::Relay;

/// Shared application state for the HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    /// Origin allowed to open WebSocket connections; `*` allows any.
    pub allowed_origin: String,
    /// Keepalive for WebSocket clients; silent clients are dropped.
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(relay: Relay, allowed_origin: impl Into<String>) -> Self {
        Self {
            relay,
            allowed_origin: allowed_origin.into(),
            heartbeat: Heartbeat::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }
}

/// GET /health: liveness check with the number of connected WebSocket clients.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "role": "pubsub-server",
            "connectedClients": state.relay().connected_clients()
        })),
    )
}
