//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

use crate::models::channel::Channel;
use crate::models::connection::Heartbeat;

/// Relay configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay bind address (e.g. `0.0.0.0:4000`).
    pub server_addr: SocketAddr,
    /// Redis connection URL (e.g. `redis://localhost:6379/`).
    pub redis_url: String,
    /// Origin allowed to open WebSocket connections. `*` allows any.
    pub cors_origin: String,
    /// Channels the relay subscribes to, one exact-match SUBSCRIBE each.
    pub channels: Vec<Channel>,
    /// WebSocket URL clients use to reach the relay.
    pub relay_url: String,
    /// Keepalive timing for WebSocket connections, both relay and client side.
    pub heartbeat: Heartbeat,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let mut server_addr: SocketAddr = std::env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:4000".to_string())
            .parse()
            .map_err(|_| ConfigLoadError::InvalidServerAddr)?;
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.parse().map_err(|_| ConfigLoadError::InvalidPort(port))?;
            server_addr.set_port(port);
        }

        let redis_url = match std::env::var("REDIS_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
                let port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                port.parse::<u16>()
                    .map_err(|_| ConfigLoadError::InvalidPort(port.clone()))?;
                format!("redis://{}:{}/", host, port)
            }
        };

        let cors_origin = std::env::var("FRONTEND_URL").unwrap_or_else(|_| "*".to_string());
        let channels = match std::env::var("RELAY_CHANNELS") {
            Ok(list) => parse_channel_list(&list)?,
            Err(_) => Channel::defaults(),
        };
        let relay_url =
            std::env::var("PUBSUB_URL").unwrap_or_else(|_| "ws://localhost:4000/ws".to_string());
        let defaults = Heartbeat::default();
        let heartbeat = Heartbeat::new(
            duration_ms("PING_INTERVAL_MS", defaults.interval)?,
            duration_ms("PING_TIMEOUT_MS", defaults.timeout)?,
        );
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_addr,
            redis_url,
            cors_origin,
            channels,
            relay_url,
            heartbeat,
            log_level,
        })
    }
}

/// Read a positive millisecond duration from `var`, falling back to `default` when unset.
fn duration_ms(var: &str, default: Duration) -> Result<Duration, ConfigLoadError> {
    match std::env::var(var) {
        Ok(raw) => parse_millis(&raw)
            .ok_or_else(|| ConfigLoadError::InvalidDuration(var.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

fn parse_millis(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}

/// Parse a comma-separated channel list. Blank entries are skipped; duplicates keep first position.
pub fn parse_channel_list(list: &str) -> Result<Vec<Channel>, ConfigLoadError> {
    let mut channels: Vec<Channel> = Vec::new();
    for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let channel: Channel = raw
            .parse()
            .map_err(|_| ConfigLoadError::InvalidChannel(raw.to_string()))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    if channels.is_empty() {
        return Err(ConfigLoadError::NoChannels);
    }
    Ok(channels)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Invalid channel in RELAY_CHANNELS: {0}")]
    InvalidChannel(String),
    #[error("RELAY_CHANNELS is empty")]
    NoChannels,
    #[error("Invalid {0}: {1} (expected milliseconds > 0)")]
    InvalidDuration(String, String),
}
