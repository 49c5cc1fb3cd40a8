//! Relay client: one WebSocket connection to the relay, feeding a [`Registry`].

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::registry::{Registry, Subscription, SubscriptionId};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::channel::{Channel, Topic};
use crate::models::connection::Heartbeat;
use crate::models::event::{ChannelEvent, ClientMessage, Envelope, WsFrame, CONNECTION_ESTABLISHED};
use crate::services::backoff::Backoff;

/// Where and how the client reaches the relay.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL, e.g. `ws://localhost:4000/ws`.
    pub url: String,
    pub backoff: Backoff,
    /// Give up on a handshake that has not completed after this long.
    pub connect_timeout: Duration,
    /// The client pings on this schedule and drops a relay that stays silent.
    pub heartbeat: Heartbeat,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: Backoff::client(),
            connect_timeout: Duration::from_secs(20),
            heartbeat: Heartbeat::default(),
        }
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            heartbeat: config.heartbeat,
            ..Self::new(config.relay_url.clone())
        }
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Stopped,
    Closed,
    /// Nothing heard from the relay within the heartbeat window.
    Unresponsive,
}

/// Client side of the relay: owns the connection task and the callback registry.
///
/// Construct one per application and pass it where needed; `connect` at startup,
/// `disconnect` at teardown.
pub struct RelayClient {
    config: ClientConfig,
    registry: Registry,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<Running>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            connected: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the connection task if it is not already running. Must be called within a tokio runtime.
    ///
    /// The task reconnects forever with capped backoff until [`disconnect`](Self::disconnect).
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                return;
            }
        }
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(
            self.config.clone(),
            self.registry.clone(),
            self.connected.clone(),
            stop_rx,
        ));
        *task = Some(Running { stop, handle });
    }

    /// Close the connection and drop every registration. Safe when not connected.
    pub async fn disconnect(&self) {
        let running = self.task.lock().take();
        if let Some(running) = running {
            let _ = running.stop.send(());
            if let Err(e) = running.handle.await {
                warn!(error = %e, "relay connection task ended abnormally");
            }
            info!("disconnected from relay");
        }
        self.connected.store(false, Ordering::SeqCst);
        self.registry.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to one channel; the callback receives the envelope's `data`.
    pub fn on<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.registry.on(channel, callback)
    }

    /// Subscribe to every channel; the callback receives `{channel, data}`.
    pub fn on_any<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.registry.on_any(callback)
    }

    pub fn off(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.registry.off(topic, id)
    }

    /// Every envelope received, for consumers that prefer a stream over callbacks.
    pub fn events(&self) -> broadcast::Receiver<Envelope> {
        self.registry.events()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.handle.abort();
        }
    }
}

async fn run(
    config: ClientConfig,
    registry: Registry,
    connected: Arc<AtomicBool>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut backoff = config.backoff.clone();
    loop {
        let end = session(&config, &registry, &connected, &mut backoff, &mut stop).await;
        connected.store(false, Ordering::SeqCst);
        match end {
            Ok(SessionEnd::Stopped) => return,
            Ok(SessionEnd::Closed) => warn!(url = %config.url, "relay closed the connection"),
            Ok(SessionEnd::Unresponsive) => warn!(url = %config.url, "relay stopped responding"),
            Err(e) => warn!(url = %config.url, error = %e, "relay connection failed"),
        }

        let delay = backoff.next_delay();
        debug!(attempt = backoff.attempts(), delay_ms = delay.as_millis() as u64, "reconnecting to relay");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut stop => return,
        }
    }
}

async fn session(
    config: &ClientConfig,
    registry: &Registry,
    connected: &AtomicBool,
    backoff: &mut Backoff,
    stop: &mut oneshot::Receiver<()>,
) -> AppResult<SessionEnd> {
    let url = config.url.as_str();
    let connecting = tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url));
    let (ws, _) = tokio::select! {
        res = connecting => res.map_err(|_| AppError::Timeout(format!("connect to {}", url)))??,
        _ = &mut *stop => return Ok(SessionEnd::Stopped),
    };
    let (mut sink, mut stream) = ws.split();
    connected.store(true, Ordering::SeqCst);
    backoff.reset();
    info!(url = %url, "connected to relay");

    let heartbeat = config.heartbeat;
    let ping = serde_json::to_string(&ClientMessage::Ping)?;
    let mut ticker = heartbeat.ticker();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = &mut *stop => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                return Ok(SessionEnd::Stopped);
            }
            incoming = stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Closed),
                };
                last_seen = Instant::now();
                match msg {
                    Message::Text(text) => handle_text(registry, &text),
                    Message::Close(_) => return Ok(SessionEnd::Closed),
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                if heartbeat.expired(last_seen, Instant::now()) {
                    return Ok(SessionEnd::Unresponsive);
                }
                sink.send(Message::Text(ping.clone())).await?;
            }
        }
    }
}

fn handle_text(registry: &Registry, text: &str) {
    let frame: WsFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "unreadable frame from relay");
            return;
        }
    };
    if frame.event == CONNECTION_ESTABLISHED {
        debug!(data = %frame.data, "relay handshake");
    }
    match frame.into_envelope() {
        Some(Ok(envelope)) => {
            registry.dispatch(&envelope);
        }
        Some(Err(e)) => warn!(error = %e, "malformed envelope from relay"),
        None => {}
    }
}
