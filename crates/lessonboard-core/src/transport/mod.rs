//! Boundary to the lesson channel and the REST state endpoint.
//!
//! The session never talks to a socket directly; it drives a
//! [`Transport`] and polls it for [`TransportEvent`]s once per tick, so
//! every network effect lands as a discrete step of the board loop.

mod connection;
mod fallback;
#[cfg(not(target_arch = "wasm32"))]
mod native;

pub use connection::{ConnectionManager, ConnectionStatus, ReconnectPolicy, StatusIndicator};
pub use fallback::{FetchError, StateSource};
#[cfg(not(target_arch = "wasm32"))]
pub use fallback::HttpStateFetcher;
#[cfg(not(target_arch = "wasm32"))]
pub use native::NativeWebSocket;

use crate::protocol::{ClientMessage, ServerMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
}

/// Something that happened on the channel since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Message(ServerMessage),
    /// The connection attempt or the open connection failed.
    Failed(String),
}

/// A publish/subscribe channel scoped to one lesson.
pub trait Transport {
    /// Start connecting. Completion is reported as [`TransportEvent::Opened`].
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Drain pending events without blocking.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn is_open(&self) -> bool;
}

/// Join a base endpoint and a lesson id into the channel URL.
pub fn lesson_url(base: &str, lesson_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), lesson_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lesson_url() {
        assert_eq!(lesson_url("ws://host/ws/", "L1"), "ws://host/ws/L1");
        assert_eq!(lesson_url("ws://host/ws", "L1"), "ws://host/ws/L1");
    }
}
