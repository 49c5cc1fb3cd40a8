//! Callback registry: multiplexes relayed envelopes to channel and wildcard subscribers.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::models::channel::{Channel, Topic};
use crate::models::event::{ChannelEvent, Envelope};

pub type ChannelCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type WildcardCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Buffered envelopes for [`Registry::events`] listeners.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Callback {
    Channel(ChannelCallback),
    Wildcard(WildcardCallback),
}

/// One registration. `live` is cleared on removal so an in-flight dispatch skips it.
#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    callback: Callback,
    live: Arc<AtomicBool>,
}

impl Entry {
    fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    topics: HashMap<Topic, Vec<Entry>>,
}

impl Inner {
    fn insert(&mut self, topic: Topic, callback: Callback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.topics.entry(topic).or_default().push(Entry {
            id,
            callback,
            live: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    fn remove(&mut self, topic: &Topic, id: SubscriptionId) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        entries.remove(pos).retire();
        if entries.is_empty() {
            self.topics.remove(topic);
        }
        true
    }

    fn clear(&mut self) {
        for entry in self.topics.drain().flat_map(|(_, entries)| entries) {
            entry.retire();
        }
    }

    fn snapshot(&self, topic: &Topic) -> Vec<Entry> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }
}

/// Channel/wildcard callback registry.
///
/// Callbacks run synchronously inside [`dispatch`](Registry::dispatch), in
/// registration order, without the registry lock held. A registration removed
/// mid-dispatch is not called for the envelope in flight.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<Envelope>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    /// Call `callback` with `data` for every envelope on `channel`.
    pub fn on<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(Topic::Channel(channel), Callback::Channel(Arc::new(callback)))
    }

    /// Call `callback` with `{channel, data}` for every envelope on any channel.
    pub fn on_any<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.register(Topic::Wildcard, Callback::Wildcard(Arc::new(callback)))
    }

    fn register(&self, topic: Topic, callback: Callback) -> Subscription {
        let id = self.inner.lock().insert(topic.clone(), callback);
        debug!(topic = %topic, "subscribed");
        Subscription {
            topic,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn off(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.inner.lock().remove(topic, id)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of registrations under `topic`.
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.inner.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one registration.
    pub fn topic_count(&self) -> usize {
        self.inner.lock().topics.len()
    }

    /// Stream of every envelope dispatched, for consumers that do not register callbacks.
    pub fn events(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    /// Deliver one envelope: exact-channel callbacks first, then wildcard callbacks.
    ///
    /// A panicking callback is logged and skipped. Returns how many callbacks completed.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let (exact, wildcard) = {
            let inner = self.inner.lock();
            (
                inner.snapshot(&Topic::Channel(envelope.channel.clone())),
                inner.snapshot(&Topic::Wildcard),
            )
        };

        let mut completed = 0;
        for entry in exact {
            if !entry.is_live() {
                continue;
            }
            if let Callback::Channel(cb) = &entry.callback {
                completed += usize::from(invoke(&envelope.channel, || cb(&envelope.data)));
            }
        }
        if !wildcard.is_empty() {
            let event = ChannelEvent {
                channel: envelope.channel.clone(),
                data: envelope.data.clone(),
            };
            for entry in wildcard {
                if !entry.is_live() {
                    continue;
                }
                if let Callback::Wildcard(cb) = &entry.callback {
                    completed += usize::from(invoke(&envelope.channel, || cb(&event)));
                }
            }
        }

        let _ = self.events.send(envelope.clone());
        completed
    }
}

fn invoke(channel: &Channel, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(channel = %channel, reason = %reason, "subscriber callback panicked");
            false
        }
    }
}

/// Handle to one registration. Dropping it keeps the registration alive.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    id: SubscriptionId,
    registry: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove exactly this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.registry.upgrade() {
            if inner.lock().remove(&self.topic, self.id) {
                debug!(topic = %self.topic, "unsubscribed");
            }
        }
    }
}
