//! Envelope and frame models for the relay WebSocket protocol.

use serde::{Deserialize, Serialize};

use super::channel::Channel;

/// Event name carried by every relayed change notification.
pub const DATA_CHANGED: &str = "dataChanged";
pub const CONNECTION_ESTABLISHED: &str = "connection_established";
pub const PONG: &str = "pong";

/// Normalized change notification sent to every client.
///
/// `data` is whatever the publisher sent; the relay wraps it without touching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Channel,
    pub data: serde_json::Value,
    /// Milliseconds since epoch at broadcast time. Freshness hint only.
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap `data` for `channel`, stamped with the current time.
    pub fn now(channel: Channel, data: serde_json::Value) -> Self {
        Self {
            channel,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Frame sent over WebSocket to clients: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WsFrame {
    pub fn data_changed(envelope: &Envelope) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: DATA_CHANGED.to_string(),
            data: serde_json::to_value(envelope)?,
        })
    }

    pub fn connection_established(socket_id: &str) -> Self {
        Self {
            event: CONNECTION_ESTABLISHED.to_string(),
            data: serde_json::json!({ "socket_id": socket_id }),
        }
    }

    pub fn pong() -> Self {
        Self {
            event: PONG.to_string(),
            data: serde_json::json!({}),
        }
    }

    /// Decode the envelope of a `dataChanged` frame; `None` for any other event.
    pub fn into_envelope(self) -> Option<Result<Envelope, serde_json::Error>> {
        (self.event == DATA_CHANGED).then(|| serde_json::from_value(self.data))
    }
}

/// Message a client may send to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

/// What a wildcard subscriber receives: the channel alongside its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: Channel,
    pub data: serde_json::Value,
}
