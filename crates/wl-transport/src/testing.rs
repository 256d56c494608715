//! Testing utilities for channel consumers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::traits::{Channel, ChannelError, ChannelEvent, ChannelOptions, EventReceiver, EventSender};

/// Scripted reply hook: sees every sent `(event, message)` and returns the
/// events the remote end answers with.
pub type Responder = Arc<dyn Fn(&str, &Value) -> Vec<ChannelEvent> + Send + Sync>;

/// In-memory channel for testing
pub struct MockChannel {
    sent: Mutex<Vec<(String, Value)>>,
    sent_notify: Notify,
    events: Mutex<Option<EventSender>>,
    responder: Mutex<Option<Responder>>,
    connected: AtomicBool,
    announce_open: AtomicBool,
    fail_sends: AtomicBool,
    refuse_connect: Mutex<Option<String>>,
    connect_attempts: AtomicUsize,
    last_options: Mutex<Option<ChannelOptions>>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Create a new mock channel that reports `Connected` as soon as it opens
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            events: Mutex::new(None),
            responder: Mutex::new(None),
            connected: AtomicBool::new(false),
            announce_open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            refuse_connect: Mutex::new(None),
            connect_attempts: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    /// Do not emit `Connected` on open; the test drives lifecycle events.
    pub fn with_deferred_open(self) -> Self {
        self.announce_open.store(false, Ordering::Relaxed);
        self
    }

    /// Make every `connect` call fail with `reason`.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        *self.refuse_connect.lock() = Some(reason.into());
    }

    /// Make every `send` call fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Install the remote side's reply hook.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Vec<ChannelEvent> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Arc::new(responder));
    }

    /// Stop answering automatically.
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Inject an inbound event. Returns false when no connection is open.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Inject a named inbound message.
    pub fn emit_message(&self, event: &str, payload: Value) -> bool {
        self.emit(ChannelEvent::message(event, payload))
    }

    /// Simulate the remote end dropping the connection.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(tx) = self.events.lock().take() {
            let _ = tx.send(ChannelEvent::Disconnected(reason.into()));
        }
    }

    /// Get sent messages
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    /// Messages sent under one event name.
    pub fn sent_on(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Clear sent messages
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Wait until at least `count` messages have been sent in total.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<(String, Value)> {
        loop {
            {
                let sent = self.sent.lock();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            self.sent_notify.notified().await;
        }
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn last_options(&self) -> Option<ChannelOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn connect(&self, options: &ChannelOptions) -> Result<EventReceiver, ChannelError> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        *self.last_options.lock() = Some(options.clone());

        if let Some(reason) = self.refuse_connect.lock().clone() {
            return Err(ChannelError::ConnectFailed(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self.announce_open.load(Ordering::Relaxed) {
            let _ = tx.send(ChannelEvent::Connected);
        }
        *self.events.lock() = Some(tx);
        self.connected.store(true, Ordering::Relaxed);
        Ok(rx)
    }

    async fn send(&self, event: &str, message: Value) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(ChannelError::SendFailed("simulated send failure".into()));
        }

        self.sent.lock().push((event.to_string(), message.clone()));
        self.sent_notify.notify_one();

        // Clone the hook out so it runs without holding the lock
        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            for reply in responder(event, &message) {
                self.emit(reply);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(tx) = self.events.lock().take() {
            let _ = tx.send(ChannelEvent::Disconnected("closed by client".into()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> ChannelOptions {
        ChannelOptions::new("localhost", 60556, true)
    }

    #[tokio::test]
    async fn test_connect_announces_open() {
        let channel = MockChannel::new();
        let mut rx = channel.connect(&options()).await.unwrap();
        assert_eq!(rx.recv().await, Some(ChannelEvent::Connected));
        assert!(channel.is_connected());
        assert_eq!(channel.connect_attempts(), 1);
        assert_eq!(channel.last_options(), Some(options()));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let channel = MockChannel::new();
        assert_eq!(
            channel.send("api", json!({})).await,
            Err(ChannelError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_responder_replies_in_order() {
        let channel = MockChannel::new().with_deferred_open();
        channel.set_responder(|event, msg| {
            vec![ChannelEvent::message(format!("{}-reply", event), msg.clone())]
        });

        let mut rx = channel.connect(&options()).await.unwrap();
        channel.send("ping", json!(1)).await.unwrap();
        channel.send("ping", json!(2)).await.unwrap();

        assert_eq!(rx.recv().await, Some(ChannelEvent::message("ping-reply", json!(1))));
        assert_eq!(rx.recv().await, Some(ChannelEvent::message("ping-reply", json!(2))));
        assert_eq!(channel.sent_on("ping").len(), 2);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let channel = MockChannel::new();
        channel.refuse_connections("companion not running");
        let err = channel.connect(&options()).await.unwrap_err();
        assert_eq!(err, ChannelError::ConnectFailed("companion not running".into()));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_closes_stream() {
        let channel = MockChannel::new().with_deferred_open();
        let mut rx = channel.connect(&options()).await.unwrap();
        channel.disconnect().await.unwrap();
        assert!(matches!(rx.recv().await, Some(ChannelEvent::Disconnected(_))));
        assert_eq!(rx.recv().await, None);
        assert!(!channel.emit(ChannelEvent::Connected));
    }

    #[tokio::test]
    async fn test_wait_for_sent() {
        let channel = Arc::new(MockChannel::new());
        let _rx = channel.connect(&options()).await.unwrap();

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.wait_for_sent(2).await })
        };
        channel.send("a", json!(1)).await.unwrap();
        channel.send("b", json!(2)).await.unwrap();

        let sent = waiter.await.unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, "b");
    }
}
