//! Broadcast relay: Redis subscription in, one `dataChanged` frame out to every client.

use crate::error::AppResult;
use crate::models::channel::Channel;
use crate::models::connection::{generate_socket_id, ConnectionState};
use crate::models::event::{Envelope, WsFrame};
use crate::repositories::RedisRepository;
use crate::services::backoff::Backoff;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Frames buffered per client before a slow client starts skipping.
const CLIENT_BUFFER: usize = 256;

struct RelayInner {
    channels: Vec<Channel>,
    tx: broadcast::Sender<Arc<str>>,
    connected: AtomicUsize,
    closing: watch::Sender<bool>,
}

/// Fan-out hub shared by the Redis subscriber and the WebSocket handlers.
///
/// Holds no per-client subscription state: every client gets every frame.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn new(channels: Vec<Channel>) -> Self {
        let (tx, _rx) = broadcast::channel(CLIENT_BUFFER);
        let (closing, _) = watch::channel(false);
        Self {
            inner: Arc::new(RelayInner {
                channels,
                tx,
                connected: AtomicUsize::new(0),
                closing,
            }),
        }
    }

    /// Channels this relay subscribes to.
    pub fn channels(&self) -> &[Channel] {
        &self.inner.channels
    }

    pub fn connected_clients(&self) -> usize {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Handle one raw Redis message. Malformed JSON is logged and dropped.
    ///
    /// Returns the envelope that was broadcast, if any.
    pub fn handle_message(&self, channel: &str, payload: &str) -> Option<Envelope> {
        let channel: Channel = match channel.parse() {
            Ok(c) => c,
            Err(e) => {
                warn!(channel = %channel, error = %e, "message on invalid channel dropped");
                return None;
            }
        };
        let data: serde_json::Value = match serde_json::from_str(payload) {
            Ok(d) => d,
            Err(e) => {
                warn!(channel = %channel, error = %e, "malformed payload dropped");
                return None;
            }
        };
        let envelope = Envelope::now(channel, data);
        match self.broadcast(&envelope) {
            Ok(count) => {
                debug!(channel = %envelope.channel, clients = count, "broadcast");
                Some(envelope)
            }
            Err(e) => {
                error!(channel = %envelope.channel, error = %e, "envelope encoding failed");
                None
            }
        }
    }

    /// Send a `dataChanged` frame to every attached client. Returns how many were attached.
    pub fn broadcast(&self, envelope: &Envelope) -> AppResult<usize> {
        let frame = serde_json::to_string(&WsFrame::data_changed(envelope)?)?;
        // No receivers is not an error: nobody is listening right now.
        Ok(self.inner.tx.send(Arc::from(frame)).unwrap_or(0))
    }

    /// Register a new WebSocket client. It receives every frame broadcast from now on.
    pub fn attach(&self) -> ClientHandle {
        ClientHandle {
            socket_id: generate_socket_id(),
            state: ConnectionState::Connecting,
            rx: self.inner.tx.subscribe(),
            closing: self.inner.closing.subscribe(),
            relay: self.inner.clone(),
        }
    }

    /// End every client's frame stream so their sockets close. Clients attached
    /// afterwards end immediately.
    pub fn shutdown(&self) {
        if !self.inner.closing.send_replace(true) {
            info!(clients = self.connected_clients(), "relay closing client connections");
        }
    }
}

/// One relay-side WebSocket client. Counted as connected between `established` and drop.
pub struct ClientHandle {
    socket_id: String,
    state: ConnectionState,
    rx: broadcast::Receiver<Arc<str>>,
    closing: watch::Receiver<bool>,
    relay: Arc<RelayInner>,
}

impl ClientHandle {
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handshake finished; the client now counts towards `connectedClients`.
    pub fn established(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.relay.connected.fetch_add(1, Ordering::SeqCst);
        }
        self.state = self.state.on_established();
    }

    /// Next frame for this client. `None` once the relay shuts down or is gone.
    ///
    /// A client that falls more than the buffer behind skips the frames it missed.
    pub async fn next_frame(&mut self) -> Option<Arc<str>> {
        loop {
            let received = tokio::select! {
                received = self.rx.recv() => received,
                _ = closed(&mut self.closing) => return None,
            };
            match received {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(socket_id = %self.socket_id, skipped, "slow client skipped frames");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.state.is_connected() {
            self.relay.connected.fetch_sub(1, Ordering::SeqCst);
        }
        self.state = self.state.on_closed();
    }
}

/// Resolves once the relay starts shutting down; never if the relay is dropped first.
async fn closed(closing: &mut watch::Receiver<bool>) {
    loop {
        if *closing.borrow_and_update() {
            return;
        }
        if closing.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Keeps the relay subscribed to its channels, reconnecting forever with capped backoff.
pub struct RelaySubscriber {
    repo: Arc<RedisRepository>,
    relay: Relay,
    backoff: Backoff,
}

impl RelaySubscriber {
    pub fn new(repo: Arc<RedisRepository>, relay: Relay) -> Self {
        Self {
            repo,
            relay,
            backoff: Backoff::redis(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            match self.session().await {
                Ok(()) => warn!("redis subscription closed"),
                Err(e) => warn!(error = %e, "redis subscription failed"),
            }
            let delay = self.backoff.next_delay();
            info!(
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting to redis"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection's lifetime: subscribe to every channel, then relay until the stream ends.
    async fn session(&mut self) -> AppResult<()> {
        let mut pubsub = self.repo.subscriber().await?;

        let mut subscribed = 0usize;
        for channel in self.relay.channels() {
            match pubsub.subscribe(channel.as_str()).await {
                Ok(()) => {
                    info!(channel = %channel, "subscribed to redis channel");
                    subscribed += 1;
                }
                Err(e) => error!(channel = %channel, error = %e, "subscribe failed"),
            }
        }
        if subscribed == 0 {
            return Err(anyhow::anyhow!("no channel could be subscribed").into());
        }
        if subscribed < self.relay.channels().len() {
            warn!(
                subscribed,
                configured = self.relay.channels().len(),
                "running with partial subscription"
            );
        }
        self.backoff.reset();

        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    self.relay.handle_message(msg.get_channel_name(), &payload);
                }
                Err(e) => warn!(channel = %msg.get_channel_name(), error = %e, "non-text payload dropped"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relay() -> Relay {
        Relay::new(Channel::defaults())
    }

    fn parse(frame: &str) -> Envelope {
        let frame: WsFrame = serde_json::from_str(frame).unwrap();
        frame.into_envelope().unwrap().unwrap()
    }

    #[tokio::test]
    async fn every_client_gets_exactly_one_frame() {
        let relay = relay();
        let mut clients: Vec<ClientHandle> = (0..3).map(|_| relay.attach()).collect();
        for c in clients.iter_mut() {
            c.established();
        }

        let sent = relay
            .handle_message("recipe:created", r#"{"recipeId":"r1","authorId":"u1"}"#)
            .unwrap();
        assert_eq!(sent.data, json!({ "recipeId": "r1", "authorId": "u1" }));

        for c in clients.iter_mut() {
            let envelope = parse(&c.next_frame().await.unwrap());
            assert_eq!(envelope, sent);
            assert!(c.rx.try_recv().is_err(), "no duplicate frame");
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_not_broadcast() {
        let relay = relay();
        let mut client = relay.attach();
        assert!(relay.handle_message("recipe:created", "not json {").is_none());
        assert!(client.rx.try_recv().is_err());

        relay.handle_message("recipe:deleted", r#"{"recipeId":"r1"}"#).unwrap();
        let envelope = parse(&client.next_frame().await.unwrap());
        assert_eq!(envelope.channel, Channel::RecipeDeleted);
    }

    #[test]
    fn pattern_channel_is_dropped() {
        let relay = relay();
        assert!(relay.handle_message("recipe:*", "{}").is_none());
    }

    #[test]
    fn broadcast_without_clients_is_fine() {
        let relay = relay();
        let envelope = Envelope::now(Channel::BlogCreated, json!({}));
        assert_eq!(relay.broadcast(&envelope).unwrap(), 0);
    }

    #[test]
    fn connected_count_follows_client_lifecycle() {
        let relay = relay();
        let mut a = relay.attach();
        let b = relay.attach();
        assert_eq!(relay.connected_clients(), 0);

        a.established();
        a.established();
        assert_eq!(a.state(), ConnectionState::Connected);
        assert_eq!(relay.connected_clients(), 1);

        drop(b);
        assert_eq!(relay.connected_clients(), 1);
        drop(a);
        assert_eq!(relay.connected_clients(), 0);
    }

    #[tokio::test]
    async fn slow_client_skips_without_blocking_others() {
        let relay = relay();
        let mut slow = relay.attach();
        let mut fast = relay.attach();

        for i in 0..(CLIENT_BUFFER + 10) {
            relay.handle_message("comment:created", &format!(r#"{{"n":{}}}"#, i));
            let envelope = parse(&fast.next_frame().await.unwrap());
            assert_eq!(envelope.data["n"], json!(i));
        }

        // The slow client resumes from the oldest frame still buffered.
        let envelope = parse(&slow.next_frame().await.unwrap());
        assert_eq!(envelope.data["n"], json!(10));
    }

    #[tokio::test]
    async fn shutdown_ends_every_client_stream() {
        let relay = relay();
        let mut before = relay.attach();
        relay.shutdown();
        relay.shutdown();
        let mut after = relay.attach();

        assert!(before.next_frame().await.is_none());
        assert!(after.next_frame().await.is_none());
    }
}
