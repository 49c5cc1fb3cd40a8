//! Client subscription registry: one WebSocket to the relay, many local callbacks.

pub mod connection;
pub mod registry;

pub use connection::{ClientConfig, RelayClient};
pub use registry::{ChannelCallback, Registry, Subscription, SubscriptionId, WildcardCallback};
