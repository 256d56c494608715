//! Session state machine.
//!
//! States progress `Disconnected -> Connected -> Authenticated -> Linked`.
//! A reset returns to `Disconnected` and forgets the identity; a disconnect
//! keeps the identity so the caller can relink later.
//!
//! All state lives behind one `parking_lot::Mutex`. It is never held across
//! an await: operations prepare under the lock, release it, then send.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wl_crypto::{cipher::MessageCipher, ids::random_id};
use wl_proto::{
    AuthenticateRequest, AuthenticatedResponse, RequestEnvelope, RequestId, RequestKind,
};
use wl_transport::Channel;

use crate::{
    chain,
    config::{AppConfig, ConnectOptions, LinkOptions},
    dispatch::{self, DispatchStats, DispatchStatsSnapshot},
    errors::SessionError,
    identity::Identity,
    link,
    registry::{Registration, RequestRegistry, Responder},
};

/// Coarse session state, derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connected,
    Authenticated,
    Linked,
}

/// Mutable session state. Always accessed under the session lock.
pub(crate) struct SessionState {
    pub(crate) connected: bool,
    pub(crate) authenticated: bool,
    pub(crate) linked: bool,
    pub(crate) identity: Option<Identity>,
    pub(crate) cipher: Option<MessageCipher>,
    pub(crate) registry: RequestRegistry,
    /// Key agreement public key published in `authenticated`
    pub(crate) companion_key: Option<String>,
    /// Consecutive channel errors
    pub(crate) strikes: u32,
    /// Completion handle of the `connect` call awaiting `authenticated`
    pub(crate) auth_waiter: Option<Responder>,
    /// Bumped whenever the dispatcher is replaced; stale dispatchers exit
    pub(crate) generation: u64,
}

impl SessionState {
    pub(crate) fn new(identity: Option<Identity>) -> Self {
        Self {
            connected: false,
            authenticated: false,
            linked: false,
            identity,
            cipher: None,
            registry: RequestRegistry::new(),
            companion_key: None,
            strikes: 0,
            auth_waiter: None,
            generation: 0,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        if self.linked {
            SessionStatus::Linked
        } else if self.authenticated {
            SessionStatus::Authenticated
        } else if self.connected {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        }
    }

    /// Seed the cipher from the held identity and mark the session linked.
    pub(crate) fn install_cipher(&mut self) -> Result<(), SessionError> {
        let identity = self.identity.as_ref().ok_or(SessionError::NotLinked)?;
        self.cipher = Some(MessageCipher::from_hex(&identity.shared_secret)?);
        self.authenticated = true;
        self.linked = true;
        Ok(())
    }

    /// Install the identity from an accepted link reply.
    ///
    /// A relink under the secret already in use keeps the live cursor and
    /// cipher: api requests sent while the relink was in flight have already
    /// moved the cursor past the one the relink disclosed.
    pub(crate) fn adopt_identity(&mut self, mut identity: Identity) -> Result<(), SessionError> {
        let live = self.identity.as_ref().filter(|live| {
            live.identity_hash == identity.identity_hash
                && live.shared_secret == identity.shared_secret
        });
        let keep_cipher = match live {
            Some(live) => {
                identity.next_id = live.next_id;
                self.cipher.is_some()
            }
            None => false,
        };

        self.identity = Some(identity);
        if keep_cipher {
            self.authenticated = true;
            self.linked = true;
            Ok(())
        } else {
            self.install_cipher()
        }
    }

    /// Forget the link but keep the connection.
    pub(crate) fn unlink(&mut self) {
        self.identity = None;
        self.cipher = None;
        self.linked = false;
    }

    /// Clear connection state and fail everything pending. Keeps the identity.
    pub(crate) fn drop_connection(&mut self, error: SessionError) -> usize {
        self.connected = false;
        self.authenticated = false;
        self.linked = false;
        self.cipher = None;
        self.companion_key = None;
        self.strikes = 0;
        if let Some(waiter) = self.auth_waiter.take() {
            let _ = waiter.send(Err(error.clone()));
        }
        self.registry.reject_all(&error)
    }

    /// Full reset: connection state, pending requests and the identity.
    pub(crate) fn reset(&mut self, error: SessionError) -> usize {
        let rejected = self.drop_connection(error);
        self.identity = None;
        rejected
    }

    /// Build the `authenticate` message for a freshly opened channel.
    pub(crate) fn prepare_authenticate(
        &mut self,
        config: &AppConfig,
    ) -> Result<(RequestId, Value), SessionError> {
        let request = AuthenticateRequest {
            origin: config.origin.clone(),
            app_name: config.app_name.clone(),
            browser: config.browser.clone(),
            identity_hash: self.identity.as_ref().map(|i| i.identity_hash.clone()),
        };
        let id = RequestId::from(random_id()?);
        let envelope =
            RequestEnvelope::new(RequestKind::Authenticate, id.clone(), serde_json::to_value(&request)?);
        let message = serde_json::to_value(&envelope)?;

        let registration = Registration::new(RequestKind::Authenticate);
        match self.auth_waiter.take() {
            Some(waiter) => self.registry.insert(&id, registration, waiter)?,
            // Reconnects re-authenticate with nobody waiting
            None => drop(self.registry.register(&id, registration)?),
        }
        Ok((id, message))
    }
}

pub(crate) struct SessionInner {
    pub(crate) config: AppConfig,
    pub(crate) channel: Arc<dyn Channel>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) stats: DispatchStats,
    /// Held from cursor advance until the message is on the wire, so the
    /// companion sees chain ids in order
    send_order: tokio::sync::Mutex<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    /// Stop the current dispatcher and invalidate its generation.
    fn stop_dispatcher(&self) {
        self.state.lock().generation += 1;
        self.abort_dispatcher();
    }

    fn abort_dispatcher(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

/// Client side of a wallet companion session.
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over `channel`. An identity held by the config is
    /// resumed on the next connect.
    pub fn new(config: AppConfig, channel: Arc<dyn Channel>) -> Self {
        let identity = config.identity.clone();
        Self {
            inner: Arc::new(SessionInner {
                config,
                channel,
                state: Mutex::new(SessionState::new(identity)),
                stats: DispatchStats::new(),
                send_order: tokio::sync::Mutex::new(()),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Open the channel and run the authenticate handshake.
    ///
    /// Resolves with the companion's `authenticated` reply. When the reply
    /// reports an existing link for the held identity the session is linked
    /// on return.
    pub async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<AuthenticatedResponse, SessionError> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut state = self.inner.state.lock();
            if state.connected {
                return Err(SessionError::InvalidState("already connected".into()));
            }
            if let Some(identity) = options.identity.clone() {
                state.identity = Some(identity);
                state.cipher = None;
            }
            if let Some(stale) = state.auth_waiter.replace(tx) {
                let _ = stale.send(Err(SessionError::InvalidState(
                    "superseded by a newer connect".into(),
                )));
            }
            state.generation += 1;
            state.generation
        };
        self.inner.abort_dispatcher();

        let channel_options = options.channel_options();
        info!(url = %channel_options.url(), "connecting to wallet companion");

        let events = match self.inner.channel.connect(&channel_options).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "channel connect failed");
                self.inner.state.lock().auth_waiter = None;
                return Err(e.into());
            }
        };

        let handle = tokio::spawn(dispatch::run(
            Arc::downgrade(&self.inner),
            events,
            generation,
        ));
        *self.inner.dispatcher.lock() = Some(handle);

        let reply = rx.await.map_err(|_| SessionError::Dropped)??;
        Ok(serde_json::from_value(reply)?)
    }

    /// Connect with the `[connect]` options of the session's config.
    pub async fn connect_with_config(&self) -> Result<AuthenticatedResponse, SessionError> {
        self.connect(self.inner.config.connect.clone()).await
    }

    /// Link (or relink) this application to `chain`, asking for `fields`.
    pub async fn link(&self, chain: &str, fields: &[&str]) -> Result<Identity, SessionError> {
        self.link_with(LinkOptions::new(chain, fields)).await
    }

    /// Link with explicit options.
    pub async fn link_with(&self, options: LinkOptions) -> Result<Identity, SessionError> {
        let order = self.inner.send_order.lock().await;
        let (id, event, message, rx) = {
            let mut state = self.inner.state.lock();
            if !state.connected {
                return Err(SessionError::ChannelUnavailable("not connected".into()));
            }

            let prepared = link::prepare_link(
                state.identity.as_ref(),
                state.companion_key.as_deref(),
                &options,
                &self.inner.config.app_hash,
            )?;

            let id = RequestId::from(prepared.request_id);
            let envelope = RequestEnvelope::new(
                prepared.kind,
                id.clone(),
                serde_json::to_value(&prepared.request)?,
            );
            let message = serde_json::to_value(&envelope)?;

            // The relink consumes the stored cursor
            if prepared.candidate.relink {
                if let Some(identity) = state.identity.as_mut() {
                    identity.next_id = prepared.candidate.next_id;
                }
            }

            let rx = state.registry.register(
                &id,
                Registration::new(prepared.kind).with_link(prepared.candidate),
            )?;
            info!(chain = %options.chain, kind = %prepared.kind, id = %id, "sending link request");
            (id, prepared.kind.event_name(), message, rx)
        };

        self.transmit(&id, event, message).await?;
        drop(order);
        let reply = rx.await.map_err(|_| SessionError::Dropped)??;
        Ok(serde_json::from_value(reply)?)
    }

    /// Send a request of `kind` and wait for its correlated response.
    ///
    /// Api requests consume the hash-chain cursor and are encrypted under a
    /// counter equal to their id. Other kinds are sent in the clear under a
    /// random id.
    pub async fn send_request(
        &self,
        kind: RequestKind,
        payload: Value,
    ) -> Result<Value, SessionError> {
        let order = self.inner.send_order.lock().await;
        let (id, message, rx) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !state.connected {
                return Err(SessionError::ChannelUnavailable("not connected".into()));
            }

            match kind {
                RequestKind::Api => {
                    if !state.linked {
                        return Err(SessionError::NotLinked);
                    }
                    let identity = state.identity.as_mut().ok_or(SessionError::NotLinked)?;
                    let cipher = state.cipher.as_mut().ok_or(SessionError::NotLinked)?;

                    let step = chain::advance(identity.next_id)?;
                    let blob = cipher.encrypt(step.request_id, &payload)?;
                    let id = RequestId::from(step.request_id);
                    let envelope = RequestEnvelope::new(kind, id.clone(), Value::String(blob))
                        .with_next_hash(step.next_hash);
                    let message = serde_json::to_value(&envelope)?;

                    let rx = state.registry.register(
                        &id,
                        Registration::new(kind).with_counter(step.request_id),
                    )?;
                    identity.next_id = step.next_id;
                    (id, message, rx)
                }
                _ => {
                    let id = RequestId::from(random_id()?);
                    let envelope = RequestEnvelope::new(kind, id.clone(), payload);
                    let message = serde_json::to_value(&envelope)?;
                    let rx = state.registry.register(&id, Registration::new(kind))?;
                    (id, message, rx)
                }
            }
        };

        debug!(kind = %kind, id = %id, "sending request");
        self.transmit(&id, kind.event_name(), message).await?;
        drop(order);
        rx.await.map_err(|_| SessionError::Dropped)?
    }

    /// Send a registered request; unregister it when the send fails.
    async fn transmit(&self, id: &RequestId, event: &str, message: Value) -> Result<(), SessionError> {
        if let Err(e) = self.inner.channel.send(event, message).await {
            warn!(id = %id, event, error = %e, "send failed");
            self.inner.state.lock().registry.remove(id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the channel and fail pending requests. The identity is kept.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let rejected = self
            .inner
            .state
            .lock()
            .drop_connection(SessionError::ChannelUnavailable("disconnected by caller".into()));
        self.inner.stop_dispatcher();
        info!(rejected, "session disconnected");
        self.inner.channel.disconnect().await?;
        Ok(())
    }

    /// Forget everything: flags, cipher, identity and pending requests.
    pub async fn reset(&self) {
        let rejected = self.inner.state.lock().reset(SessionError::SessionReset);
        self.inner.stop_dispatcher();
        self.inner.stats.record_reset();
        info!(rejected, "session reset by caller");
        if let Err(e) = self.inner.channel.disconnect().await {
            warn!(error = %e, "channel teardown failed during reset");
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().authenticated
    }

    pub fn is_linked(&self) -> bool {
        self.inner.state.lock().linked
    }

    /// Current identity, for persistence by the caller.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.lock().identity.clone()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wl_transport::testing::MockChannel;

    fn identity() -> Identity {
        Identity {
            chain: "BTS".into(),
            identity_hash: "ident".into(),
            shared_secret: "11".repeat(32),
            next_id: 99,
            requested: Default::default(),
            app_hash: "app".into(),
        }
    }

    fn session(channel: Arc<MockChannel>) -> Session {
        Session::new(AppConfig::new("demo", "firefox", "example.org"), channel)
    }

    #[test]
    fn test_status_follows_flags() {
        let mut state = SessionState::new(Some(identity()));
        assert_eq!(state.status(), SessionStatus::Disconnected);
        state.connected = true;
        assert_eq!(state.status(), SessionStatus::Connected);
        state.install_cipher().unwrap();
        assert_eq!(state.status(), SessionStatus::Linked);
        assert!(state.authenticated);
    }

    #[test]
    fn test_install_cipher_needs_identity() {
        let mut state = SessionState::new(None);
        assert_eq!(state.install_cipher().unwrap_err(), SessionError::NotLinked);
        assert!(!state.linked);
    }

    #[test]
    fn test_relink_keeps_live_cursor_and_cipher() {
        let mut state = SessionState::new(Some(identity()));
        state.connected = true;
        state.install_cipher().unwrap();
        // An api request went out under 99 while the relink was in flight
        state.cipher.as_mut().unwrap().encrypt(99, &json!({})).unwrap();
        state.identity.as_mut().unwrap().next_id = 123;

        let mut relinked = identity();
        relinked.requested.insert("email".into(), json!("granted:email"));
        state.adopt_identity(relinked).unwrap();

        let adopted = state.identity.as_ref().unwrap();
        assert_eq!(adopted.next_id, 123);
        assert_eq!(adopted.requested["email"], "granted:email");
        assert_eq!(state.status(), SessionStatus::Linked);
        assert!(matches!(
            state.cipher.as_mut().unwrap().encrypt(99, &json!({})),
            Err(wl_crypto::cipher::CipherError::CounterReuse(99))
        ));
    }

    #[test]
    fn test_new_link_replaces_cursor_and_cipher() {
        let mut state = SessionState::new(Some(identity()));
        state.connected = true;
        state.install_cipher().unwrap();
        state.cipher.as_mut().unwrap().encrypt(99, &json!({})).unwrap();

        let other = Identity {
            identity_hash: "other".into(),
            shared_secret: "22".repeat(32),
            next_id: 5,
            ..identity()
        };
        state.adopt_identity(other).unwrap();

        assert_eq!(state.identity.as_ref().unwrap().next_id, 5);
        assert!(state.cipher.as_mut().unwrap().encrypt(99, &json!({})).is_ok());
    }

    #[tokio::test]
    async fn test_drop_connection_keeps_identity() {
        let mut state = SessionState::new(Some(identity()));
        state.connected = true;
        state.install_cipher().unwrap();
        let rx = state
            .registry
            .register(&RequestId::Number(5), Registration::new(RequestKind::Api))
            .unwrap();

        assert_eq!(state.drop_connection(SessionError::Dropped), 1);
        assert_eq!(state.status(), SessionStatus::Disconnected);
        assert!(state.cipher.is_none());
        assert!(state.identity.is_some());
        assert_eq!(rx.await.unwrap(), Err(SessionError::Dropped));
    }

    #[test]
    fn test_reset_forgets_identity() {
        let mut state = SessionState::new(Some(identity()));
        state.connected = true;
        state.install_cipher().unwrap();
        state.reset(SessionError::SessionReset);
        assert!(state.identity.is_none());
        assert!(state.cipher.is_none());
        assert!(!state.connected);
    }

    #[test]
    fn test_prepare_authenticate_presents_identity_hash() {
        let config = AppConfig::new("demo", "firefox", "example.org");
        let mut state = SessionState::new(Some(identity()));
        let (id, message) = state.prepare_authenticate(&config).unwrap();

        assert_eq!(message["type"], "authenticate");
        assert_eq!(message["payload"]["identityhash"], "ident");
        assert_eq!(message["payload"]["appName"], "demo");
        assert!(state.registry.contains(&id));
    }

    #[tokio::test]
    async fn test_requests_need_connection() {
        let channel = Arc::new(MockChannel::new());
        let session = session(channel);
        let err = session
            .send_request(RequestKind::Api, json!({"method": "getAccount"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelUnavailable(_)));
        let err = session.link("BTS", &["account"]).await.unwrap_err();
        assert!(matches!(err, SessionError::ChannelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let channel = Arc::new(MockChannel::new());
        channel.refuse_connections("connection refused");
        let session = session(channel.clone());

        let err = session.connect(ConnectOptions::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::ChannelUnavailable(_)));
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(
            channel.last_options().unwrap().url(),
            "wss://localhost:60556"
        );
    }

    #[tokio::test]
    async fn test_api_requires_link() {
        let channel = Arc::new(MockChannel::new());
        channel.set_responder(|event, message| {
            if event == "authenticate" {
                vec![wl_transport::ChannelEvent::message(
                    "authenticated",
                    json!({"id": message["id"], "payload": {"link": false, "authenticate": true}}),
                )]
            } else {
                Vec::new()
            }
        });
        let session = session(channel);
        session.connect(ConnectOptions::default()).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Authenticated);

        let err = session
            .send_request(RequestKind::Api, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NotLinked);
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_unregisters() {
        let channel = Arc::new(MockChannel::new());
        channel.set_responder(|event, message| {
            if event == "authenticate" {
                vec![wl_transport::ChannelEvent::message(
                    "authenticated",
                    json!({"id": message["id"], "payload": {"link": false, "authenticate": true}}),
                )]
            } else {
                Vec::new()
            }
        });
        let session = session(channel.clone());
        session.connect(ConnectOptions::default()).await.unwrap();

        channel.fail_sends(true);
        let err = session
            .send_request(RequestKind::Authenticate, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelUnavailable(_)));
        assert_eq!(session.pending_requests(), 0);
    }
}
