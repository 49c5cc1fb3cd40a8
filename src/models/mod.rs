//! Data models for channels, envelopes, connections, and notification payloads.

pub mod channel;
pub mod connection;
pub mod event;
pub mod notification;

pub use channel::*;
pub use connection::*;
pub use event::*;
pub use notification::*;
