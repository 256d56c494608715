//! Channel trait, options and events.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Where and how to reach the companion process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelOptions {
    pub host: String,
    pub port: u16,
    /// Use the TLS endpoint
    pub ssl: bool,
}

impl ChannelOptions {
    pub fn new(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        Self {
            host: host.into(),
            port,
            ssl,
        }
    }

    /// Endpoint url, `wss://host:port` or `ws://host:port`.
    pub fn url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Everything a channel reports to its consumer, in delivery order.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Transport is open (also emitted after a transparent reconnect)
    Connected,
    /// A named message from the companion
    Message { event: String, payload: Value },
    /// Non-fatal transport error
    Error(String),
    /// Connection attempt failed; `terminal` when the transport gave up
    ConnectError { reason: String, terminal: bool },
    /// Transport closed
    Disconnected(String),
}

impl ChannelEvent {
    pub fn message(event: impl Into<String>, payload: Value) -> Self {
        ChannelEvent::Message {
            event: event.into(),
            payload,
        }
    }
}

/// Receiving half handed out by [`Channel::connect`].
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Sending half used by channel implementations.
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Bidirectional named-event message channel.
///
/// Delivery is reliable and ordered per direction; the whole connection may
/// drop at any time, which is reported as [`ChannelEvent::Disconnected`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Open the transport and return the stream of inbound events.
    async fn connect(&self, options: &ChannelOptions) -> Result<EventReceiver, ChannelError>;

    /// Emit `message` under the event name `event`.
    async fn send(&self, event: &str, message: Value) -> Result<(), ChannelError>;

    /// Close the transport. Closing twice is not an error.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Check if the transport is open
    fn is_connected(&self) -> bool;
}

/// Common channel error type
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("channel closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        assert_eq!(
            ChannelOptions::new("localhost", 60556, true).url(),
            "wss://localhost:60556"
        );
        assert_eq!(
            ChannelOptions::new("127.0.0.1", 60555, false).url(),
            "ws://127.0.0.1:60555"
        );
    }
}
