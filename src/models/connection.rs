//! WebSocket connection lifecycle and keepalive timing.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle of one WebSocket client. `Disconnected` is terminal; a new handshake is a new client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Next state after a successful handshake step.
    pub fn on_established(self) -> Self {
        match self {
            ConnectionState::Connecting => ConnectionState::Connected,
            other => other,
        }
    }

    pub fn on_closed(self) -> Self {
        ConnectionState::Disconnected
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Keepalive timing for one end of a relay connection.
///
/// The side that owns it pings every `interval`; a peer silent for longer than
/// `interval + timeout` is treated as gone even if TCP never reported a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(20),
        }
    }
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Whether a peer last heard from at `last_seen` has gone quiet for too long.
    pub fn expired(&self, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) > self.interval + self.timeout
    }

    /// Ticker for the ping loop. The first tick fires after one full interval.
    pub fn ticker(&self) -> tokio::time::Interval {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    }
}

/// Generate a unique socket/connection id.
pub fn generate_socket_id() -> String {
    format!("{}.{}", std::process::id(), Uuid::new_v4().as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        let state = ConnectionState::Connecting;
        let state = state.on_established();
        assert!(state.is_connected());
        let state = state.on_closed();
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(state.on_established(), ConnectionState::Disconnected);
    }

    #[test]
    fn closing_before_handshake_is_terminal() {
        assert_eq!(
            ConnectionState::Connecting.on_closed(),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn heartbeat_expires_after_interval_plus_timeout() {
        let hb = Heartbeat::new(Duration::from_secs(10), Duration::from_secs(5));
        let seen = Instant::now();
        assert!(!hb.expired(seen, seen + Duration::from_secs(15)));
        assert!(hb.expired(seen, seen + Duration::from_secs(16)));
        // A clock reading before last_seen never counts as silence.
        assert!(!hb.expired(seen + Duration::from_secs(1), seen));
    }

    #[test]
    fn socket_ids_are_unique() {
        let a = generate_socket_id();
        let b = generate_socket_id();
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("{}.", std::process::id())));
    }
}
