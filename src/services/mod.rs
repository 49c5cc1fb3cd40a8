//! Publisher, relay, and the reconnect policy they share.

pub mod backoff;
pub mod events;
pub mod publisher;
pub mod relay;

pub use backoff::{Backoff, Growth};
pub use events::EntityEvents;
pub use publisher::{EventPublisher, EventSink, PublisherTask};
pub use relay::{ClientHandle, Relay, RelaySubscriber};
