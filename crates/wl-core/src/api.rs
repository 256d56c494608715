//! Typed wrappers over the companion's api methods.
//!
//! Each call is an encrypted `api` request whose plaintext is
//! `{method, params}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wl_proto::{ApiCall, RequestKind};

use crate::{errors::SessionError, session::Session};

/// Method names understood by the companion.
pub mod methods {
    pub const GET_ACCOUNT: &str = "getAccount";
    pub const REQUEST_SIGNATURE: &str = "requestSignature";
    pub const INJECTED_CALL: &str = "injectedCall";
    pub const SIGN_MESSAGE: &str = "signMessage";
    pub const VERIFY_MESSAGE: &str = "verifyMessage";
    pub const TRANSFER: &str = "transfer";
    pub const VOTE_FOR: &str = "voteFor";
}

/// A message signed by the companion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    /// Account that signed
    pub signer: String,
    /// Public key of the signing key
    pub key: String,
    pub message: String,
    /// Signature, hex
    pub signed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Integer amount in the asset's smallest unit, as a string
    pub amount: String,
    pub asset_id: String,
}

/// Parameters of a `transfer` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl TransferRequest {
    pub fn new(to: impl Into<String>, amount: u64, asset_id: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            amount: Amount {
                amount: amount.to_string(),
                asset_id: asset_id.into(),
            },
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Parameters of a `voteFor` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Object id of the worker, witness or committee member
    pub id: String,
}

impl Session {
    /// Send an arbitrary api call.
    pub async fn call(&self, call: ApiCall) -> Result<Value, SessionError> {
        self.send_request(RequestKind::Api, serde_json::to_value(&call)?)
            .await
    }

    async fn call_method(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        self.call(ApiCall::new(method, params)).await
    }

    /// Account the companion linked for this chain.
    pub async fn get_account(&self) -> Result<Value, SessionError> {
        self.call_method(methods::GET_ACCOUNT, json!({})).await
    }

    /// Ask the companion to prove control of the linked account.
    pub async fn request_signature(&self) -> Result<Value, SessionError> {
        self.call_method(methods::REQUEST_SIGNATURE, json!({})).await
    }

    /// Forward a serialized call made on an injected library object.
    pub async fn injected_call(&self, params: Value) -> Result<Value, SessionError> {
        self.call_method(methods::INJECTED_CALL, params).await
    }

    pub async fn sign_message(&self, message: &str) -> Result<SignedMessage, SessionError> {
        let reply = self
            .call_method(methods::SIGN_MESSAGE, json!({ "message": message }))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Check a signed message. Companions answer with a bare bool or
    /// `{"verified": bool}`.
    pub async fn verify_message(&self, signed: &SignedMessage) -> Result<bool, SessionError> {
        let reply = self
            .call_method(methods::VERIFY_MESSAGE, serde_json::to_value(signed)?)
            .await?;
        let verified = match &reply {
            Value::Bool(verified) => Some(*verified),
            Value::Object(fields) => fields.get("verified").and_then(Value::as_bool),
            _ => None,
        };
        verified.ok_or_else(|| SessionError::Malformed(format!("unexpected verify reply: {}", reply)))
    }

    pub async fn transfer(&self, request: &TransferRequest) -> Result<Value, SessionError> {
        self.call_method(methods::TRANSFER, serde_json::to_value(request)?)
            .await
    }

    pub async fn vote_for(&self, request: &VoteRequest) -> Result<Value, SessionError> {
        self.call_method(methods::VOTE_FOR, serde_json::to_value(request)?)
            .await
    }
}
