//! Capability injection.
//!
//! Wraps a chain library object so that its signing and broadcasting go
//! through the companion instead of local private keys. The wrapped object
//! is never modified; [`InjectedSigner`] serializes it and forwards the
//! operation as an `injectedCall`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{errors::SessionError, session::Session};

/// Placeholder passed instead of a private key when registering a signer.
pub const EXTERNAL_SIGNER: &str = "inject_wif";

/// Something a library object can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Accepts typed operations into a transaction under construction
    AddOperation,
    /// Collects signer public keys
    AddSigner,
    /// Broadcasts through a completion callback
    BroadcastCallback,
    /// Places exchange orders
    PlaceOrder,
}

/// How operations of a chain family reach the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Build a transaction locally, sign and broadcast remotely
    TransactionBuilder,
    /// Hand a finished transaction to a callback-style broadcaster
    CallbackBroadcast,
    /// Submit an order object
    OrderPlacement,
}

/// Chains grouped by how their client libraries are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    BitsharesLike,
    SteemLike,
    BinanceLike,
}

impl ChainFamily {
    /// Family of a chain symbol, if injection supports it.
    pub fn from_chain(chain: &str) -> Option<Self> {
        match chain {
            "BTS" | "BTS_TEST" | "TUSC" => Some(ChainFamily::BitsharesLike),
            "STEEM" => Some(ChainFamily::SteemLike),
            "BNB" | "BNB_TEST" => Some(ChainFamily::BinanceLike),
            _ => None,
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            ChainFamily::BitsharesLike => Strategy::TransactionBuilder,
            ChainFamily::SteemLike => Strategy::CallbackBroadcast,
            ChainFamily::BinanceLike => Strategy::OrderPlacement,
        }
    }

    /// Check the target's declared capabilities against what the family's
    /// strategy needs. Returns the first missing capability.
    pub fn detect(self, capabilities: &[Capability]) -> Result<(), Capability> {
        let required: &[Capability] = match self {
            ChainFamily::BitsharesLike => &[Capability::AddOperation, Capability::AddSigner],
            ChainFamily::SteemLike => &[Capability::BroadcastCallback],
            ChainFamily::BinanceLike => &[Capability::PlaceOrder],
        };
        match required.iter().find(|c| !capabilities.contains(c)) {
            Some(missing) => Err(*missing),
            None => Ok(()),
        }
    }
}

/// A library object that can be injected.
pub trait InjectionTarget: Send + Sync {
    fn capabilities(&self) -> Vec<Capability>;

    /// Serialized state forwarded to the companion.
    fn to_payload(&self) -> Result<Value, SessionError>;
}

/// Signing surface handed back to the application.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Register a signer. `key` must be [`EXTERNAL_SIGNER`].
    fn add_signer(&mut self, key: &str, public_key: &str) -> Result<(), SessionError>;

    /// Public keys registered so far.
    fn signers(&self) -> &[String];

    /// Have the companion sign the target.
    async fn sign(&self) -> Result<Value, SessionError>;

    /// Have the companion sign (where needed) and broadcast the target.
    async fn broadcast(&self) -> Result<Value, SessionError>;
}

/// Injected wrapper around a [`InjectionTarget`].
pub struct InjectedSigner<T> {
    session: Session,
    target: T,
    family: ChainFamily,
    signers: Vec<String>,
}

impl<T: InjectionTarget> InjectedSigner<T> {
    /// Wrap `target` for the chain of the session's identity.
    pub fn new(session: &Session, target: T) -> Result<Self, SessionError> {
        let chain = session
            .identity()
            .map(|identity| identity.chain)
            .ok_or(SessionError::NotLinked)?;

        let family = ChainFamily::from_chain(&chain).ok_or_else(|| {
            SessionError::UnsupportedInjection(format!("no injection strategy for chain {}", chain))
        })?;

        family.detect(&target.capabilities()).map_err(|missing| {
            SessionError::UnsupportedInjection(format!(
                "{:?} target lacks {:?}",
                family, missing
            ))
        })?;

        debug!(chain = %chain, ?family, "injected target");
        Ok(Self {
            session: session.clone(),
            target,
            family,
            signers: Vec::new(),
        })
    }

    pub fn family(&self) -> ChainFamily {
        self.family
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    async fn forward(&self, operation: &str) -> Result<Value, SessionError> {
        let params = json!([operation, self.target.to_payload()?, self.signers]);
        debug!(operation, family = ?self.family, "forwarding injected call");
        self.session.injected_call(params).await
    }
}

#[async_trait]
impl<T: InjectionTarget> RemoteSigner for InjectedSigner<T> {
    fn add_signer(&mut self, key: &str, public_key: &str) -> Result<(), SessionError> {
        if key != EXTERNAL_SIGNER {
            return Err(SessionError::PrivateKeyRejected);
        }
        if !self.signers.iter().any(|k| k == public_key) {
            self.signers.push(public_key.to_string());
        }
        Ok(())
    }

    fn signers(&self) -> &[String] {
        &self.signers
    }

    async fn sign(&self) -> Result<Value, SessionError> {
        match self.family.strategy() {
            Strategy::TransactionBuilder => self.forward("sign").await,
            Strategy::CallbackBroadcast => self.forward("signTransaction").await,
            Strategy::OrderPlacement => Err(SessionError::UnsupportedInjection(
                "orders are signed when placed".into(),
            )),
        }
    }

    async fn broadcast(&self) -> Result<Value, SessionError> {
        match self.family.strategy() {
            Strategy::TransactionBuilder => self.forward("signAndBroadcast").await,
            Strategy::CallbackBroadcast => self.forward("broadcast").await,
            Strategy::OrderPlacement => self.forward("placeOrder").await,
        }
    }
}
