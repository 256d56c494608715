//! Test harness: an in-process wallet companion.
//!
//! [`CompanionSimulator`] answers the client's traffic on a
//! [`MockChannel`]: it authenticates, links with key agreement, verifies
//! the hash chain on every correlated request, and answers api calls with
//! replies encrypted under the request's counter. Failures can be scripted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use wl_crypto::{
    cipher::MessageCipher,
    hash::{sha256_hex, verify_chain_hash},
    key_agreement::StaticKeyPair,
};
use wl_proto::{
    ApiCall, AuthenticateRequest, AuthenticatedResponse, LinkRequest, LinkResponse, RemoteError,
    RequestEnvelope, RequestId, ResponseEnvelope, API, AUTHENTICATE, AUTHENTICATED, LINK,
    LINK_REQUEST, RELINK_REQUEST,
};
use wl_transport::{testing::MockChannel, ChannelEvent};

use crate::api::methods;

/// Companion-side record of one link.
struct LinkRecord {
    chain: String,
    cipher: MessageCipher,
    /// Hash disclosed with the previous correlated request
    expected_hash: String,
}

#[derive(Default)]
struct SimState {
    links: HashMap<String, LinkRecord>,
    /// Identity hash the current connection is linked under
    active: Option<String>,
    key_agreements: usize,
    issued: u64,
    reject_links: Option<String>,
    fatal_next_api: bool,
    wrong_counter_next_api: bool,
    chain_violations: usize,
    api_calls: Vec<ApiCall>,
    account: Value,
}

/// Scriptable wallet companion.
pub struct CompanionSimulator {
    keys: StaticKeyPair,
    state: Mutex<SimState>,
}

impl Default for CompanionSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionSimulator {
    pub fn new() -> Self {
        Self {
            keys: StaticKeyPair::generate(),
            state: Mutex::new(SimState {
                account: json!({"name": "alice", "id": "1.2.17"}),
                ..SimState::default()
            }),
        }
    }

    /// Answer every message the client sends on `channel`.
    pub fn attach(self: &Arc<Self>, channel: &MockChannel) {
        let companion = Arc::clone(self);
        channel.set_responder(move |event, message| companion.respond(event, message));
    }

    pub fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    /// Decline link requests with `reason` until cleared.
    pub fn reject_links(&self, reason: Option<&str>) {
        self.state.lock().reject_links = reason.map(str::to_string);
    }

    /// Answer the next api request with the fatal error code.
    pub fn fail_next_api_fatally(&self) {
        self.state.lock().fatal_next_api = true;
    }

    /// Encrypt the next api reply under the wrong counter.
    pub fn corrupt_next_api_reply(&self) {
        self.state.lock().wrong_counter_next_api = true;
    }

    pub fn set_account(&self, account: Value) {
        self.state.lock().account = account;
    }

    /// Number of first links that ran key agreement.
    pub fn key_agreements(&self) -> usize {
        self.state.lock().key_agreements
    }

    /// Correlated requests whose id did not match the disclosed hash.
    pub fn chain_violations(&self) -> usize {
        self.state.lock().chain_violations
    }

    /// Decrypted api calls, in arrival order.
    pub fn api_calls(&self) -> Vec<ApiCall> {
        self.state.lock().api_calls.clone()
    }

    pub fn is_linked(&self, identity_hash: &str) -> bool {
        self.state.lock().links.contains_key(identity_hash)
    }

    /// Forget a link, as if the user revoked it in the wallet.
    pub fn revoke(&self, identity_hash: &str) {
        let mut state = self.state.lock();
        state.links.remove(identity_hash);
        if state.active.as_deref() == Some(identity_hash) {
            state.active = None;
        }
    }

    /// Produce the events the companion answers `message` with.
    pub fn respond(&self, event: &str, message: &Value) -> Vec<ChannelEvent> {
        let Ok(request) = serde_json::from_value::<RequestEnvelope>(message.clone()) else {
            return Vec::new();
        };

        let mut state = self.state.lock();
        let reply = match event {
            AUTHENTICATE => self.on_authenticate(&mut state, &request),
            LINK_REQUEST | RELINK_REQUEST => self.on_link(&mut state, event, &request),
            API => self.on_api(&mut state, &request),
            _ => return Vec::new(),
        };
        vec![reply]
    }

    fn on_authenticate(&self, state: &mut SimState, request: &RequestEnvelope) -> ChannelEvent {
        let auth: AuthenticateRequest = match serde_json::from_value(request.payload.clone()) {
            Ok(auth) => auth,
            Err(e) => return error_reply(AUTHENTICATED, &request.id, 1, &e.to_string()),
        };

        let existing = auth
            .identity_hash
            .filter(|hash| state.links.contains_key(hash));
        state.active = existing.clone();

        let response = AuthenticatedResponse {
            link: existing.is_some(),
            authenticate: true,
            pub_key: Some(self.keys.public_key_hex()),
            requested: None,
        };
        ok_reply(AUTHENTICATED, &request.id, to_value(&response))
    }

    fn on_link(&self, state: &mut SimState, event: &str, request: &RequestEnvelope) -> ChannelEvent {
        let link: LinkRequest = match serde_json::from_value(request.payload.clone()) {
            Ok(link) => link,
            Err(e) => return error_reply(LINK, &request.id, 1, &e.to_string()),
        };

        if let Some(reason) = state.reject_links.clone() {
            return ok_reply(
                LINK,
                &request.id,
                to_value(&LinkResponse {
                    message: Some(reason),
                    ..LinkResponse::default()
                }),
            );
        }

        let (identity_hash, existing) = if event == RELINK_REQUEST {
            let Some(hash) = link.identity_hash.clone() else {
                return error_reply(LINK, &request.id, 1, "relink without identity hash");
            };
            let Some(record) = state.links.get_mut(&hash) else {
                return error_reply(LINK, &request.id, 1, "unknown identity");
            };
            let id = request.id.as_u64().unwrap_or_default();
            if !verify_chain_hash(id, &record.expected_hash) {
                state.chain_violations += 1;
                return error_reply(LINK, &request.id, 1, "hash chain violation");
            }
            record.expected_hash = link.next_hash.clone();
            (hash, true)
        } else {
            let Some(pubkey) = link.pubkey.as_deref() else {
                return error_reply(LINK, &request.id, 1, "link without public key");
            };
            let secret = match self.keys.shared_secret_hex(pubkey) {
                Ok(secret) => secret,
                Err(e) => return error_reply(LINK, &request.id, 1, &e.to_string()),
            };
            let cipher = match MessageCipher::from_hex(&secret) {
                Ok(cipher) => cipher,
                Err(e) => return error_reply(LINK, &request.id, 1, &e.to_string()),
            };
            state.key_agreements += 1;
            state.issued += 1;
            let hash = sha256_hex(format!("{}:{}", pubkey, state.issued).as_bytes());
            state.links.insert(
                hash.clone(),
                LinkRecord {
                    chain: link.chain.clone(),
                    cipher,
                    expected_hash: link.next_hash.clone(),
                },
            );
            (hash, false)
        };
        state.active = Some(identity_hash.clone());

        let mut requested = Map::new();
        for field in &link.request {
            let value = match field.as_str() {
                "account" => state.account.clone(),
                other => json!(format!("granted:{}", other)),
            };
            requested.insert(field.clone(), value);
        }

        let chain = state
            .links
            .get(&identity_hash)
            .map(|record| record.chain.clone());
        let response = LinkResponse {
            link: true,
            authenticate: true,
            existing,
            identity_hash: Some(identity_hash),
            chain,
            requested,
            error: None,
            message: None,
        };
        ok_reply(LINK, &request.id, to_value(&response))
    }

    fn on_api(&self, state: &mut SimState, request: &RequestEnvelope) -> ChannelEvent {
        let Some(counter) = request.id.as_u64() else {
            return error_reply(API, &request.id, 1, "non-numeric id");
        };
        let Some(active) = state.active.clone() else {
            return error_reply(API, &request.id, 1, "not linked");
        };

        if std::mem::take(&mut state.fatal_next_api) {
            return error_reply(API, &request.id, 2, "identity revoked");
        }
        let corrupt = std::mem::take(&mut state.wrong_counter_next_api);

        let Some(record) = state.links.get_mut(&active) else {
            return error_reply(API, &request.id, 1, "not linked");
        };
        if !verify_chain_hash(counter, &record.expected_hash) {
            state.chain_violations += 1;
            return error_reply(API, &request.id, 1, "hash chain violation");
        }
        if let Some(next_hash) = &request.next_hash {
            record.expected_hash = next_hash.clone();
        }

        let call: ApiCall = match request
            .payload
            .as_str()
            .ok_or("payload is not a ciphertext")
            .and_then(|blob| {
                record
                    .cipher
                    .decrypt(counter, blob)
                    .map_err(|_| "payload did not decrypt")
            })
            .and_then(|plain| {
                serde_json::from_value(plain).map_err(|_| "payload is not an api call")
            }) {
            Ok(call) => call,
            Err(reason) => return error_reply(API, &request.id, 1, reason),
        };

        let result = match call.method.as_str() {
            methods::GET_ACCOUNT => state.account.clone(),
            methods::SIGN_MESSAGE => json!({
                "signer": state.account["name"],
                "key": "BTS6simulatedkey",
                "message": call.params["message"],
                "signed": sha256_hex(call.params.to_string().as_bytes()),
            }),
            methods::VERIFY_MESSAGE => json!(
                call.params["signed"].as_str()
                    == Some(sha256_hex(json!({"message": call.params["message"]}).to_string().as_bytes()).as_str())
            ),
            _ => json!({"method": call.method, "params": call.params}),
        };

        let reply_counter = if corrupt {
            counter.wrapping_add(1)
        } else {
            counter
        };
        let reply = record.cipher.encrypt(reply_counter, &result);
        state.api_calls.push(call);

        match reply {
            Ok(blob) => ChannelEvent::message(
                API,
                to_value(&ResponseEnvelope::encrypted(request.id.clone(), blob)),
            ),
            Err(e) => error_reply(API, &request.id, 1, &e.to_string()),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn ok_reply(event: &str, id: &RequestId, payload: Value) -> ChannelEvent {
    ChannelEvent::message(event, to_value(&ResponseEnvelope::ok(id.clone(), payload)))
}

fn error_reply(event: &str, id: &RequestId, code: i64, message: &str) -> ChannelEvent {
    ChannelEvent::message(
        event,
        to_value(&ResponseEnvelope::error(id.clone(), RemoteError::new(code, message))),
    )
}
