//! JSON message types exchanged with the wallet companion.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::{RequestKind, FATAL_ERROR_CODE};

// ============================================================================
// Correlation ids
// ============================================================================

/// Correlation id of a request.
///
/// The client always emits numbers, but companions are free to echo the id
/// back as a string. Matching is done on [`RequestId::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    /// String-normalized form used for registry lookups.
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::Text(s) => s.trim().to_string(),
        }
    }

    /// Numeric value, when the id is (or spells) an integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => Some(*n),
            RequestId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Outgoing message wrapper, for every request kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Event name of the request kind
    #[serde(rename = "type")]
    pub kind: String,
    pub id: RequestId,
    /// Plain JSON, or a hex ciphertext string for api requests
    pub payload: Value,
    /// Hash of the next hash-chain id, api requests only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hash: Option<String>,
}

impl RequestEnvelope {
    pub fn new(kind: RequestKind, id: RequestId, payload: Value) -> Self {
        Self {
            kind: kind.event_name().to_string(),
            id,
            payload,
            next_hash: None,
        }
    }

    pub fn with_next_hash(mut self, next_hash: impl Into<String>) -> Self {
        self.next_hash = Some(next_hash.into());
        self
    }

    /// Request kind named by the `type` field.
    pub fn request_kind(&self) -> Option<RequestKind> {
        RequestKind::from_event_name(&self.kind)
    }
}

/// Error object attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this error demands a full session reset.
    pub fn is_fatal(&self) -> bool {
        self.code == FATAL_ERROR_CODE
    }
}

/// Incoming reply wrapper for `authenticated`, `link` and `api` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl ResponseEnvelope {
    /// Plain successful reply.
    pub fn ok(id: impl Into<RequestId>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            payload,
            encrypted: false,
            error: None,
        }
    }

    /// Encrypted successful reply; `ciphertext` is the hex blob.
    pub fn encrypted(id: impl Into<RequestId>, ciphertext: String) -> Self {
        Self {
            id: Some(id.into()),
            payload: Value::String(ciphertext),
            encrypted: true,
            error: None,
        }
    }

    /// Error reply.
    pub fn error(id: impl Into<RequestId>, error: RemoteError) -> Self {
        Self {
            id: Some(id.into()),
            payload: Value::Null,
            encrypted: false,
            error: Some(error),
        }
    }
}

// ============================================================================
// Handshake payloads
// ============================================================================

/// Payload of the `authenticate` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub origin: String,
    #[serde(rename = "appName")]
    pub app_name: String,
    pub browser: String,
    /// Present when resuming a stored link
    #[serde(
        rename = "identityhash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_hash: Option<String>,
}

/// Payload of the `authenticated` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedResponse {
    /// Companion already holds a link for the presented identity hash
    #[serde(default)]
    pub link: bool,
    #[serde(default)]
    pub authenticate: bool,
    /// Companion's public key for key agreement, hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<Map<String, Value>>,
}

/// Payload of `linkRequest` and `relinkRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub chain: String,
    /// Names of the data fields the application asks to be granted
    pub request: Vec<String>,
    pub next_hash: String,
    /// Ephemeral key agreement public key, first link only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    /// Stored identity hash, relink only
    #[serde(
        rename = "identityhash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_hash: Option<String>,
}

/// Payload of the `link` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkResponse {
    #[serde(default)]
    pub link: bool,
    #[serde(default)]
    pub authenticate: bool,
    #[serde(default)]
    pub existing: bool,
    #[serde(
        rename = "identityhash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default)]
    pub requested: Map<String, Value>,
    /// Companions send `true`, a string, or an object here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LinkResponse {
    /// The companion declined the link.
    pub fn is_rejected(&self) -> bool {
        let flagged = match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        };
        flagged || !self.link
    }

    /// Best human-readable reason for a rejection.
    pub fn rejection_reason(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(o)) => o
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("link declined")
                .to_string(),
            _ => "link declined".to_string(),
        }
    }
}

// ============================================================================
// Api payloads
// ============================================================================

/// Plaintext body of an api request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ApiCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}
