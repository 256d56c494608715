//! Event dispatch for inbound channel traffic.
//!
//! One task per connection drains the channel's event stream. Lifecycle
//! events (open, error, close) are handled here; named messages are routed
//! to the [`EventHandler`] registered for their event name. Handlers run
//! under the session lock and never await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use serde_json::Value;
use tracing::{debug, info, warn};
use wl_proto::{
    AuthenticatedResponse, LinkResponse, RemoteError, RequestId, ResponseEnvelope, API,
    AUTHENTICATED, LINK,
};
use wl_transport::{ChannelEvent, EventReceiver};

use crate::{
    errors::SessionError,
    link::complete_link,
    registry::PendingRequest,
    session::{SessionInner, SessionState},
};

// ============================================================================
// Dispatch Statistics
// ============================================================================

/// Counters for inbound traffic.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Named messages received
    pub received: AtomicU64,
    /// Pending requests completed successfully
    pub resolved: AtomicU64,
    /// Pending requests completed with an error
    pub rejected: AtomicU64,
    /// Messages with no pending request or no handler
    pub dropped: AtomicU64,
    /// Encrypted replies that failed to open
    pub decryption_failures: AtomicU64,
    /// Channel error and connect error events
    pub channel_errors: AtomicU64,
    /// Full session resets
    pub resets: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }

    fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_decryption_failures(&self) {
        self.decryption_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_channel_errors(&self) {
        self.channel_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn resolve(&self, entry: PendingRequest, value: Value) {
        let id = entry.id.clone();
        self.resolved.fetch_add(1, Ordering::Relaxed);
        if !entry.resolve(value) {
            debug!(id = %id, "caller stopped waiting before the response arrived");
        }
    }

    fn reject(&self, entry: PendingRequest, error: SessionError) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        entry.reject(error);
    }
}

/// Snapshot of dispatch statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub decryption_failures: u64,
    pub channel_errors: u64,
    pub resets: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Result of handling one named message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Matched and processed
    Handled,
    /// No pending request matched
    Dropped,
    /// The companion signalled a fatal condition; reset the session
    Fatal(String),
}

/// Handler for one inbound event name.
pub(crate) trait EventHandler: Send + Sync {
    fn handle(
        &self,
        state: &mut SessionState,
        stats: &DispatchStats,
        envelope: ResponseEnvelope,
        raw: &Value,
    ) -> Outcome;
}

/// Find the pending request a reply answers. Handshake replies sent without
/// an id match the oldest request of their kind.
fn take_entry(
    state: &mut SessionState,
    id: Option<&RequestId>,
    response_event: &str,
) -> Option<PendingRequest> {
    match id {
        Some(id) => state.registry.take(id),
        None => state.registry.take_oldest_for(response_event),
    }
}

/// Handshake bodies arrive either wrapped in `payload` or flat.
fn body(envelope: &ResponseEnvelope, raw: &Value) -> Value {
    if envelope.payload.is_null() {
        raw.clone()
    } else {
        envelope.payload.clone()
    }
}

fn remote_outcome(error: &RemoteError) -> Outcome {
    if error.is_fatal() {
        Outcome::Fatal(format!("companion error {}: {}", error.code, error.message))
    } else {
        Outcome::Handled
    }
}

struct AuthenticatedHandler;

impl EventHandler for AuthenticatedHandler {
    fn handle(
        &self,
        state: &mut SessionState,
        stats: &DispatchStats,
        envelope: ResponseEnvelope,
        raw: &Value,
    ) -> Outcome {
        let Some(entry) = take_entry(state, envelope.id.as_ref(), AUTHENTICATED) else {
            return Outcome::Dropped;
        };

        if let Some(error) = &envelope.error {
            stats.reject(entry, SessionError::AuthenticationFailed(error.message.clone()));
            return remote_outcome(error);
        }

        let response: AuthenticatedResponse = match serde_json::from_value(body(&envelope, raw)) {
            Ok(response) => response,
            Err(e) => {
                stats.reject(entry, e.into());
                return Outcome::Handled;
            }
        };

        state.authenticated = true;
        state.companion_key = response.pub_key.clone();
        info!(existing_link = response.link, "authenticated with companion");

        if response.link && state.identity.is_some() {
            if let (Some(identity), Some(granted)) = (state.identity.as_mut(), &response.requested) {
                identity.merge_requested(granted);
            }
            match state.install_cipher() {
                Ok(()) => info!("resumed stored link"),
                Err(e) => warn!(error = %e, "stored identity could not seed the cipher"),
            }
        }

        match serde_json::to_value(&response) {
            Ok(value) => stats.resolve(entry, value),
            Err(e) => stats.reject(entry, e.into()),
        }
        Outcome::Handled
    }
}

struct LinkHandler;

impl EventHandler for LinkHandler {
    fn handle(
        &self,
        state: &mut SessionState,
        stats: &DispatchStats,
        envelope: ResponseEnvelope,
        raw: &Value,
    ) -> Outcome {
        let Some(mut entry) = take_entry(state, envelope.id.as_ref(), LINK) else {
            return Outcome::Dropped;
        };

        if let Some(error) = &envelope.error {
            state.unlink();
            stats.reject(entry, SessionError::LinkRejected(error.message.clone()));
            return remote_outcome(error);
        }

        let body = body(&envelope, raw);
        let Some(candidate) = entry.link.take() else {
            // Sent through send_request; nothing to install
            stats.resolve(entry, body);
            return Outcome::Handled;
        };

        let response: LinkResponse = match serde_json::from_value(body) {
            Ok(response) => response,
            Err(e) => {
                stats.reject(entry, e.into());
                return Outcome::Handled;
            }
        };

        let identity = match complete_link(candidate, &response) {
            Ok(identity) => identity,
            Err(e) => {
                if matches!(e, SessionError::LinkRejected(_)) {
                    warn!(id = %entry.id, reason = %e, "link rejected; identity discarded");
                    state.unlink();
                }
                stats.reject(entry, e);
                return Outcome::Handled;
            }
        };

        if let Err(e) = state.adopt_identity(identity) {
            state.unlink();
            stats.reject(entry, e);
            return Outcome::Handled;
        }
        info!(id = %entry.id, existing = response.existing, "linked");
        match serde_json::to_value(&state.identity) {
            Ok(value) => stats.resolve(entry, value),
            Err(e) => stats.reject(entry, e.into()),
        }
        Outcome::Handled
    }
}

struct ApiHandler;

impl EventHandler for ApiHandler {
    fn handle(
        &self,
        state: &mut SessionState,
        stats: &DispatchStats,
        envelope: ResponseEnvelope,
        _raw: &Value,
    ) -> Outcome {
        let Some(entry) = envelope.id.as_ref().and_then(|id| state.registry.take(id)) else {
            return Outcome::Dropped;
        };

        if let Some(error) = envelope.error {
            debug!(id = %entry.id, code = error.code, "api request failed remotely");
            let outcome = remote_outcome(&error);
            stats.reject(entry, error.into());
            return outcome;
        }

        if !envelope.encrypted {
            stats.resolve(entry, envelope.payload);
            return Outcome::Handled;
        }

        let opened = match (
            state.cipher.as_ref(),
            entry.counter.or_else(|| entry.id.as_u64()),
            envelope.payload.as_str(),
        ) {
            (Some(cipher), Some(counter), Some(blob)) => cipher.decrypt(counter, blob).ok(),
            _ => None,
        };

        match opened {
            Some(value) => stats.resolve(entry, value),
            None => {
                warn!(id = %entry.id, "encrypted reply did not decrypt");
                stats.inc_decryption_failures();
                let id = entry.id.key();
                stats.reject(entry, SessionError::DecryptionFailed(id));
            }
        }
        Outcome::Handled
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes named messages to handlers by event name.
pub(crate) struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn EventHandler>>,
}

impl Dispatcher {
    /// Dispatcher with the `authenticated`, `link` and `api` handlers.
    pub(crate) fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register(AUTHENTICATED, Box::new(AuthenticatedHandler));
        dispatcher.register(LINK, Box::new(LinkHandler));
        dispatcher.register(API, Box::new(ApiHandler));
        dispatcher
    }

    pub(crate) fn register(&mut self, event: &'static str, handler: Box<dyn EventHandler>) {
        self.handlers.insert(event, handler);
        debug!(event, "registered handler");
    }

    #[cfg(test)]
    pub(crate) fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Route one named message.
    pub(crate) fn dispatch(
        &self,
        state: &mut SessionState,
        stats: &DispatchStats,
        event: &str,
        payload: &Value,
    ) -> Outcome {
        stats.inc_received();

        let Some(handler) = self.handlers.get(event) else {
            debug!(event, "no handler for event");
            stats.inc_dropped();
            return Outcome::Dropped;
        };

        let envelope: ResponseEnvelope = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(event, error = %e, "malformed message dropped");
                stats.inc_dropped();
                return Outcome::Dropped;
            }
        };

        let id = envelope.id.clone();
        let outcome = handler.handle(state, stats, envelope, payload);
        if outcome == Outcome::Dropped {
            warn!(event, id = ?id, "no pending request matched; dropped");
            stats.inc_dropped();
        }
        outcome
    }
}

/// What the run loop does after an event was processed under the lock.
enum Step {
    Continue,
    /// Send a message prepared under the lock
    Send { id: RequestId, event: &'static str, message: Value },
    /// The session was reset; close the channel and stop
    Teardown,
    /// This dispatcher was superseded
    Stop,
}

fn process(
    inner: &SessionInner,
    dispatcher: &Dispatcher,
    event: ChannelEvent,
    generation: u64,
) -> Step {
    let mut state = inner.state.lock();
    if state.generation != generation {
        return Step::Stop;
    }

    let fatal = match event {
        ChannelEvent::Connected => {
            state.connected = true;
            state.authenticated = false;
            state.linked = false;
            state.cipher = None;
            state.strikes = 0;
            info!("channel open; authenticating");
            return match state.prepare_authenticate(&inner.config) {
                Ok((id, message)) => Step::Send {
                    id,
                    event: wl_proto::AUTHENTICATE,
                    message,
                },
                Err(e) => {
                    warn!(error = %e, "could not build authenticate request");
                    if let Some(waiter) = state.auth_waiter.take() {
                        let _ = waiter.send(Err(e));
                    }
                    Step::Continue
                }
            };
        }
        ChannelEvent::Message { event, payload } => {
            match dispatcher.dispatch(&mut state, &inner.stats, &event, &payload) {
                Outcome::Handled => {
                    state.strikes = 0;
                    None
                }
                Outcome::Dropped => None,
                Outcome::Fatal(reason) => Some(reason),
            }
        }
        ChannelEvent::Error(reason) => strike(&mut state, inner, &reason, false),
        ChannelEvent::ConnectError { reason, terminal } => {
            strike(&mut state, inner, &reason, terminal)
        }
        ChannelEvent::Disconnected(reason) => {
            let rejected =
                state.drop_connection(SessionError::ChannelUnavailable(reason.clone()));
            info!(reason = %reason, rejected, "channel closed");
            None
        }
    };

    match fatal {
        Some(reason) => {
            let rejected = state.reset(SessionError::FatalProtocolError(reason.clone()));
            state.generation += 1;
            inner.stats.record_reset();
            warn!(reason = %reason, rejected, "session reset");
            Step::Teardown
        }
        None => Step::Continue,
    }
}

/// Count a channel error. Returns the reset reason once the limit is hit.
fn strike(
    state: &mut SessionState,
    inner: &SessionInner,
    reason: &str,
    terminal: bool,
) -> Option<String> {
    inner.stats.inc_channel_errors();
    state.strikes += 1;
    let limit = inner.config.session.max_channel_errors;
    warn!(reason, strikes = state.strikes, limit, terminal, "channel error");

    if terminal {
        Some(format!("terminal connect error: {}", reason))
    } else if state.strikes >= limit {
        Some(format!("{} consecutive channel errors, last: {}", state.strikes, reason))
    } else {
        None
    }
}

/// Drain `events` until the stream ends, the session is dropped, or the
/// session is reset or reconnected.
pub(crate) async fn run(inner: Weak<SessionInner>, mut events: EventReceiver, generation: u64) {
    let dispatcher = Dispatcher::new();

    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            debug!(generation, "session dropped; dispatcher stopped");
            return;
        };

        match process(&inner, &dispatcher, event, generation) {
            Step::Continue => {}
            Step::Send { id, event, message } => {
                if let Err(e) = inner.channel.send(event, message).await {
                    warn!(id = %id, error = %e, "authenticate send failed");
                    if let Some(entry) = inner.state.lock().registry.take(&id) {
                        inner.stats.reject(entry, e.into());
                    }
                }
            }
            Step::Teardown => {
                if let Err(e) = inner.channel.disconnect().await {
                    warn!(error = %e, "channel teardown failed");
                }
                debug!(generation, "dispatcher stopped after reset");
                return;
            }
            Step::Stop => {
                debug!(generation, "dispatcher superseded");
                return;
            }
        }
    }

    // The stream ended without a close event; treat it as a lost connection
    if let Some(inner) = inner.upgrade() {
        let mut state = inner.state.lock();
        if state.generation == generation {
            let rejected = state
                .drop_connection(SessionError::ChannelUnavailable("event stream closed".into()));
            info!(rejected, "event stream closed");
        }
    }
    debug!(generation, "dispatcher stopped");
}
