//! Fire-and-forget event publisher embedded in API servers.
//!
//! `publish` only serializes and enqueues; a background worker owns the Redis
//! connection and issues the PUBLISH. Nothing here ever returns an error to the
//! caller: a notification that cannot be delivered is logged and lost.

use crate::error::AppResult;
use crate::models::channel::Channel;
use crate::repositories::RedisRepository;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination of serialized events.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one payload; returns how many subscribers received it.
    async fn send(&self, channel: &Channel, payload: &str) -> AppResult<u64>;
}

#[async_trait]
impl EventSink for RedisRepository {
    async fn send(&self, channel: &Channel, payload: &str) -> AppResult<u64> {
        self.publish(channel.as_str(), payload).await
    }
}

#[derive(Debug)]
struct Outgoing {
    channel: Channel,
    payload: String,
}

/// Cloneable handle shared by every publishing call site in the process.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Outgoing>,
}

/// The worker behind an [`EventPublisher`]. Dropping it stops the worker as well.
pub struct PublisherTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl EventPublisher {
    /// Spawn the delivery worker on the current runtime.
    pub fn start(sink: Arc<dyn EventSink>) -> (Self, PublisherTask) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(sink, rx, stop_rx));
        (Self { tx }, PublisherTask { stop, handle })
    }

    /// Publisher backed by a Redis connection opened lazily on first publish.
    pub fn redis(redis_url: &str) -> AppResult<(Self, PublisherTask)> {
        let repo = RedisRepository::new(redis_url)?;
        Ok(Self::start(Arc::new(repo)))
    }

    /// Announce a committed mutation. Returns immediately; never fails.
    ///
    /// Call only after the write the event describes has succeeded.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &Channel, data: &T) {
        let payload = match serde_json::to_string(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(channel = %channel, error = %e, "event serialization failed, dropped");
                return;
            }
        };
        let outgoing = Outgoing {
            channel: channel.clone(),
            payload,
        };
        if self.tx.send(outgoing).is_err() {
            warn!(channel = %channel, "publisher stopped, event dropped");
        }
    }

    /// Like [`publish`](Self::publish) for a channel given by name; invalid names are logged and dropped.
    pub fn publish_to<T: Serialize + ?Sized>(&self, channel: &str, data: &T) {
        match channel.parse::<Channel>() {
            Ok(channel) => self.publish(&channel, data),
            Err(e) => warn!(channel = %channel, error = %e, "invalid channel, event dropped"),
        }
    }
}

impl PublisherTask {
    /// Stop accepting events, deliver what is already queued, then return.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "publisher worker ended abnormally");
        }
    }
}

async fn run_worker(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    mut stop: oneshot::Receiver<()>,
) {
    info!("event publisher started");
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(outgoing) => deliver(sink.as_ref(), outgoing).await,
                None => break,
            },
            _ = &mut stop => {
                rx.close();
                while let Some(outgoing) = rx.recv().await {
                    deliver(sink.as_ref(), outgoing).await;
                }
                break;
            }
        }
    }
    info!("event publisher stopped");
}

async fn deliver(sink: &dyn EventSink, outgoing: Outgoing) {
    match sink.send(&outgoing.channel, &outgoing.payload).await {
        Ok(count) => debug!(channel = %outgoing.channel, count, "event published"),
        Err(e) => warn!(channel = %outgoing.channel, error = %e, "event publish failed, dropped"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every payload; fails the first `failures` sends.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<(Channel, String)>>,
        failures: AtomicUsize,
    }

    impl RecordingSink {
        pub fn failing(failures: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(failures),
            }
        }

        pub fn sent(&self) -> Vec<(Channel, serde_json::Value)> {
            self.sent
                .lock()
                .iter()
                .map(|(c, p)| (c.clone(), serde_json::from_str(p).unwrap()))
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, channel: &Channel, payload: &str) -> AppResult<u64> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::Internal(anyhow::anyhow!("sink down")));
            }
            self.sent.lock().push((channel.clone(), payload.to_string()));
            Ok(1)
        }
    }

    #[tokio::test]
    async fn publishes_in_call_order() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        publisher.publish(&Channel::RecipeCreated, &json!({ "recipeId": "r1" }));
        publisher.publish(&Channel::RecipeDeleted, &json!({ "recipeId": "r1" }));
        task.shutdown().await;

        assert_eq!(
            sink.sent(),
            vec![
                (Channel::RecipeCreated, json!({ "recipeId": "r1" })),
                (Channel::RecipeDeleted, json!({ "recipeId": "r1" })),
            ]
        );
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed_and_next_event_still_sent() {
        let sink = Arc::new(RecordingSink::failing(1));
        let (publisher, task) = EventPublisher::start(sink.clone());
        publisher.publish(&Channel::BlogCreated, &json!({ "blogId": "lost" }));
        publisher.publish(&Channel::BlogCreated, &json!({ "blogId": "b2" }));
        task.shutdown().await;

        assert_eq!(
            sink.sent(),
            vec![(Channel::BlogCreated, json!({ "blogId": "b2" }))]
        );
    }

    #[tokio::test]
    async fn unserializable_data_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        publisher.publish(&Channel::CommentCreated, &bad);
        publisher.publish(&Channel::CommentCreated, &json!({ "commentId": "c1" }));
        task.shutdown().await;

        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn invalid_channel_name_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        publisher.publish_to("recipe:*", &json!({}));
        publisher.publish_to("", &json!({}));
        publisher.publish_to("rating:added", &json!({ "ratingId": "x" }));
        task.shutdown().await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Channel::Other("rating:added".to_string()));
    }

    #[tokio::test]
    async fn publish_after_shutdown_does_not_panic() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, task) = EventPublisher::start(sink.clone());
        task.shutdown().await;
        publisher.publish(&Channel::FavoriteAdded, &json!({}));
        assert!(sink.sent().is_empty());
    }
}
