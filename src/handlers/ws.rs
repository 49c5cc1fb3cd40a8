//! WebSocket handler: origin check, then push every relayed frame to the client.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::event::{ClientMessage, WsFrame};

const HEADER_ORIGIN: &str = "origin";

/// Upgrade HTTP to WebSocket. Browser origins must match the configured origin; no auth.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let origin = headers.get(HEADER_ORIGIN).and_then(|v| v.to_str().ok());
    if let Some(origin) = origin {
        if !origin_allowed(&state.allowed_origin, origin) {
            warn!(origin = %origin, "ws origin rejected");
            return Err(AppError::Forbidden(origin.to_string()));
        }
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket)))
}

/// Parse host from Origin header (e.g. "https://app.example.com" -> "app.example.com").
pub(crate) fn parse_origin_host(origin: &str) -> Option<String> {
    let u = origin.strip_prefix("https://").or_else(|| origin.strip_prefix("http://"))?;
    let host = u.split('/').next()?.to_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Check an Origin header against the configured origin (`*`, a URL, a host, or `*.example.com`).
pub(crate) fn origin_allowed(allowed: &str, origin: &str) -> bool {
    let allowed = allowed.trim().to_lowercase();
    if allowed == "*" {
        return true;
    }
    let Some(origin_host) = parse_origin_host(&origin.to_lowercase()) else {
        return false;
    };
    let allowed_host = parse_origin_host(&allowed).unwrap_or(allowed);
    match allowed_host.strip_prefix("*.") {
        Some(base) => origin_host == base || origin_host.ends_with(&format!(".{}", base)),
        None => allowed_host == origin_host,
    }
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let mut client = state.relay().attach();
    let socket_id = client.socket_id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let hello = match serde_json::to_string(&WsFrame::connection_established(&socket_id)) {
        Ok(h) => h,
        Err(e) => {
            warn!(socket_id = %socket_id, error = %e, "handshake encoding failed");
            return;
        }
    };
    if sender.send(Message::Text(hello)).await.is_err() {
        return;
    }
    client.established();
    info!(
        socket_id = %socket_id,
        clients = state.relay().connected_clients(),
        "ws connected"
    );

    let heartbeat = state.heartbeat;
    let mut ticker = heartbeat.ticker();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = client.next_frame() => {
                let Some(frame) = frame else {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    debug!(socket_id = %socket_id, "ws send failed");
                    break;
                }
            }
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(_)) | None => break,
                };
                last_seen = Instant::now();
                match msg {
                    Message::Text(text) => {
                        if let Ok(ClientMessage::Ping) = serde_json::from_str::<ClientMessage>(&text) {
                            let pong = serde_json::to_string(&WsFrame::pong()).unwrap_or_default();
                            if sender.send(Message::Text(pong)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                if heartbeat.expired(last_seen, Instant::now()) {
                    warn!(socket_id = %socket_id, "ws client unresponsive, dropping");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(client);
    info!(
        socket_id = %socket_id,
        clients = state.relay().connected_clients(),
        "ws disconnected"
    );
}
