//! Error types for the wallet link session.
//!
//! Every operation surfaces failures through [`SessionError`]. Component
//! crates keep their own error enums; the `From` impls below fold them in.

use thiserror::Error;
use wl_crypto::{cipher::CipherError, ids::RngError, key_agreement::KeyAgreementError};
use wl_proto::{validation::ValidationError, RemoteError};
use wl_transport::ChannelError;

/// Unified error type for session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No connection when the call requires one
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Companion declined or failed the authenticate handshake
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Companion declined the link; the identity was discarded
    #[error("link rejected: {0}")]
    LinkRejected(String),

    /// Api call attempted before linking
    #[error("not linked")]
    NotLinked,

    /// Api reply could not be opened; only that request is affected
    #[error("decryption failed for request {0}")]
    DecryptionFailed(String),

    /// Target object does not expose a capability the chain family needs
    #[error("unsupported injection: {0}")]
    UnsupportedInjection(String),

    /// Remote or channel signalled a condition that forced a full reset
    #[error("fatal protocol error: {0}")]
    FatalProtocolError(String),

    /// Error reported by the companion for one request
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// A private key was offered where only the external signer is allowed
    #[error("private keys must not be injected; use the external signer sentinel")]
    PrivateKeyRejected,

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Local cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Message could not be built or parsed
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Caller reset the session while the request was pending
    #[error("session was reset")]
    SessionReset,

    /// Pending entry discarded without a response
    #[error("request dropped before a response arrived")]
    Dropped,
}

impl SessionError {
    /// Whether this error tore down the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::FatalProtocolError(_))
    }
}

impl From<RemoteError> for SessionError {
    fn from(e: RemoteError) -> Self {
        SessionError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        SessionError::ChannelUnavailable(e.to_string())
    }
}

impl From<CipherError> for SessionError {
    fn from(e: CipherError) -> Self {
        SessionError::Crypto(e.to_string())
    }
}

impl From<KeyAgreementError> for SessionError {
    fn from(e: KeyAgreementError) -> Self {
        SessionError::Crypto(e.to_string())
    }
}

impl From<RngError> for SessionError {
    fn from(e: RngError) -> Self {
        SessionError::Crypto(e.to_string())
    }
}

impl From<ValidationError> for SessionError {
    fn from(e: ValidationError) -> Self {
        SessionError::Malformed(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Malformed(e.to_string())
    }
}
