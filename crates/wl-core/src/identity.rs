//! Long-lived link record.
//!
//! An [`Identity`] is created by the first successful link and updated by
//! relinks. The session owns it; callers export it with
//! [`crate::session::Session::identity`] and persist it however they like.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::SessionError;

/// Linkage between this application and the companion for one chain.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Chain symbol, e.g. `BTS`
    pub chain: String,
    /// Companion-issued identifier of the link
    #[serde(rename = "identityhash")]
    pub identity_hash: String,
    /// Hex shared secret seeding the api cipher
    #[serde(rename = "secret")]
    pub shared_secret: String,
    /// Hash-chain cursor: id of the next outgoing api request
    pub next_id: u64,
    /// Data the companion granted, by field name
    #[serde(default)]
    pub requested: Map<String, Value>,
    #[serde(rename = "apphash", default)]
    pub app_hash: String,
}

impl Identity {
    /// Merge newly granted fields; later grants replace earlier ones.
    pub fn merge_requested(&mut self, granted: &Map<String, Value>) {
        for (field, value) in granted {
            self.requested.insert(field.clone(), value.clone());
        }
    }

    pub fn granted(&self, field: &str) -> Option<&Value> {
        self.requested.get(field)
    }

    /// Serialize for external persistence.
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain)
            .field("identity_hash", &self.identity_hash)
            .field("shared_secret", &"<redacted>")
            .field("next_id", &self.next_id)
            .field("requested", &self.requested)
            .field("app_hash", &self.app_hash)
            .finish()
    }
}
