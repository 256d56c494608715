//! Request registry.
//!
//! Maps correlation ids (string-normalized) to the completion handle of the
//! caller waiting on that request. An entry is matched at most once: taking it
//! removes it. Entries are registered before the request is transmitted.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use wl_proto::{RequestId, RequestKind};

use crate::{errors::SessionError, link::LinkCandidate};

/// What a waiting caller eventually receives.
pub type ResponseResult = Result<Value, SessionError>;

/// Caller side of a pending request.
pub type ResponseReceiver = oneshot::Receiver<ResponseResult>;

/// Completion side of a pending request.
pub type Responder = oneshot::Sender<ResponseResult>;

/// Registration parameters for a request about to be sent.
pub struct Registration {
    pub kind: RequestKind,
    /// Cipher counter used to open an encrypted reply
    pub counter: Option<u64>,
    /// Handshake state carried by link requests
    pub link: Option<LinkCandidate>,
}

impl Registration {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            counter: None,
            link: None,
        }
    }

    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn with_link(mut self, candidate: LinkCandidate) -> Self {
        self.link = Some(candidate);
        self
    }
}

/// An in-flight request awaiting its response.
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub counter: Option<u64>,
    pub link: Option<LinkCandidate>,
    seq: u64,
    responder: Responder,
}

impl PendingRequest {
    /// Complete successfully. Returns false if the caller stopped waiting.
    pub fn resolve(self, value: Value) -> bool {
        self.responder.send(Ok(value)).is_ok()
    }

    /// Complete with an error. Returns false if the caller stopped waiting.
    pub fn reject(self, error: SessionError) -> bool {
        self.responder.send(Err(error)).is_ok()
    }
}

/// Pending requests keyed by normalized correlation id.
#[derive(Default)]
pub struct RequestRegistry {
    entries: HashMap<String, PendingRequest>,
    next_seq: u64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiver the caller awaits.
    pub fn register(
        &mut self,
        id: &RequestId,
        registration: Registration,
    ) -> Result<ResponseReceiver, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.insert(id, registration, tx)?;
        Ok(rx)
    }

    /// Register a request whose completion handle already exists.
    pub fn insert(
        &mut self,
        id: &RequestId,
        registration: Registration,
        responder: Responder,
    ) -> Result<(), SessionError> {
        let key = id.key();
        if self.entries.contains_key(&key) {
            return Err(SessionError::InvalidState(format!(
                "request id {} is already pending",
                key
            )));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            PendingRequest {
                id: id.clone(),
                kind: registration.kind,
                counter: registration.counter,
                link: registration.link,
                seq,
                responder,
            },
        );
        Ok(())
    }

    /// Remove and return the entry for `id`.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id.key())
    }

    /// Remove and return the oldest entry answered on `response_event`.
    ///
    /// Used for handshake replies that arrive without an id.
    pub fn take_oldest_for(&mut self, response_event: &str) -> Option<PendingRequest> {
        let key = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.kind.response_event() == response_event)
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&key)
    }

    /// Drop an entry whose request never made it onto the wire.
    pub fn remove(&mut self, id: &RequestId) -> bool {
        self.entries.remove(&id.key()).is_some()
    }

    /// Reject every pending entry with a clone of `error`.
    pub fn reject_all(&mut self, error: &SessionError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.reject(error.clone());
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(&id.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_match_wins() {
        let mut registry = RequestRegistry::new();
        let id = RequestId::Number(11);
        let rx = registry
            .register(&id, Registration::new(RequestKind::Api).with_counter(11))
            .unwrap();

        let entry = registry.take(&RequestId::Text("11".into())).unwrap();
        assert_eq!(entry.counter, Some(11));
        assert!(entry.resolve(json!({"ok": true})));
        assert!(registry.take(&id).is_none());

        assert_eq!(rx.await.unwrap(), Ok(json!({"ok": true})));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut registry = RequestRegistry::new();
        let id = RequestId::Number(5);
        let _rx = registry.register(&id, Registration::new(RequestKind::Api)).unwrap();
        let err = registry
            .register(&RequestId::Text("5".into()), Registration::new(RequestKind::Api))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_take_oldest_for_event() {
        let mut registry = RequestRegistry::new();
        let _a = registry
            .register(&RequestId::Number(900), Registration::new(RequestKind::LinkRequest))
            .unwrap();
        let _b = registry
            .register(&RequestId::Number(100), Registration::new(RequestKind::RelinkRequest))
            .unwrap();
        let _c = registry
            .register(&RequestId::Number(50), Registration::new(RequestKind::Api))
            .unwrap();

        let first = registry.take_oldest_for("link").unwrap();
        assert_eq!(first.id, RequestId::Number(900));
        let second = registry.take_oldest_for("link").unwrap();
        assert_eq!(second.id, RequestId::Number(100));
        assert!(registry.take_oldest_for("link").is_none());
        assert!(registry.take_oldest_for("authenticated").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reject_all_empties_registry() {
        let mut registry = RequestRegistry::new();
        let rx1 = registry
            .register(&RequestId::Number(1), Registration::new(RequestKind::Api))
            .unwrap();
        let rx2 = registry
            .register(&RequestId::Number(2), Registration::new(RequestKind::Api))
            .unwrap();

        assert_eq!(registry.reject_all(&SessionError::SessionReset), 2);
        assert!(registry.is_empty());
        assert_eq!(rx1.await.unwrap(), Err(SessionError::SessionReset));
        assert_eq!(rx2.await.unwrap(), Err(SessionError::SessionReset));
    }

    #[test]
    fn test_resolve_after_caller_gone() {
        let mut registry = RequestRegistry::new();
        let rx = registry
            .register(&RequestId::Number(3), Registration::new(RequestKind::Api))
            .unwrap();
        drop(rx);
        let entry = registry.take(&RequestId::Number(3)).unwrap();
        assert!(!entry.resolve(json!(null)));
    }

    #[test]
    fn test_remove() {
        let mut registry = RequestRegistry::new();
        let id = RequestId::Number(8);
        let _rx = registry.register(&id, Registration::new(RequestKind::Api)).unwrap();
        assert!(registry.contains(&id));
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
    }
}
