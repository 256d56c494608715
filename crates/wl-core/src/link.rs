//! Link and relink handshake.
//!
//! A first link runs key agreement against the key the companion published
//! while authenticating, and sends the ephemeral public key. A relink reuses
//! the stored secret and resumes the stored hash-chain cursor, sending the
//! identity hash instead. Both always disclose `next_hash`.

use serde_json::{Map, Value};
use tracing::debug;
use wl_crypto::key_agreement;
use wl_proto::{validation::validate_link_request, LinkRequest, LinkResponse, RequestKind};

use crate::{chain, config::LinkOptions, errors::SessionError, identity::Identity};

/// Identity under construction while a link request is in flight.
#[derive(Clone)]
pub struct LinkCandidate {
    pub chain: String,
    /// Known for relinks, issued by the companion for first links
    pub identity_hash: Option<String>,
    shared_secret: String,
    pub next_id: u64,
    /// Grants carried over from the stored identity
    pub requested: Map<String, Value>,
    pub app_hash: String,
    pub relink: bool,
}

impl LinkCandidate {
    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }
}

impl std::fmt::Debug for LinkCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCandidate")
            .field("chain", &self.chain)
            .field("identity_hash", &self.identity_hash)
            .field("shared_secret", &"<redacted>")
            .field("next_id", &self.next_id)
            .field("relink", &self.relink)
            .finish()
    }
}

/// A link request ready to register and send.
#[derive(Debug)]
pub struct PreparedLink {
    pub kind: RequestKind,
    pub request_id: u64,
    pub request: LinkRequest,
    pub candidate: LinkCandidate,
}

/// Build the link or relink request for the current session state.
pub fn prepare_link(
    existing: Option<&Identity>,
    companion_key: Option<&str>,
    options: &LinkOptions,
    app_hash: &str,
) -> Result<PreparedLink, SessionError> {
    options
        .validate()
        .map_err(|e| SessionError::Malformed(e.to_string()))?;

    let prepared = match existing {
        Some(identity) => prepare_relink(identity, options)?,
        None => prepare_initial(companion_key, options, app_hash)?,
    };
    validate_link_request(&prepared.request)?;
    Ok(prepared)
}

fn prepare_initial(
    companion_key: Option<&str>,
    options: &LinkOptions,
    app_hash: &str,
) -> Result<PreparedLink, SessionError> {
    let companion_key = companion_key.ok_or_else(|| {
        SessionError::AuthenticationFailed("companion did not publish a public key".into())
    })?;

    let agreement = key_agreement::agree(companion_key)?;
    let step = chain::fresh()?;
    debug!(chain = %options.chain, "prepared first link with key agreement");

    Ok(PreparedLink {
        kind: RequestKind::LinkRequest,
        request_id: step.request_id,
        request: LinkRequest {
            chain: options.chain.clone(),
            request: options.request_details.clone(),
            next_hash: step.next_hash,
            pubkey: Some(agreement.public_key().to_string()),
            identity_hash: None,
        },
        candidate: LinkCandidate {
            chain: options.chain.clone(),
            identity_hash: None,
            shared_secret: agreement.shared_secret().to_string(),
            next_id: step.next_id,
            requested: Map::new(),
            app_hash: app_hash.to_string(),
            relink: false,
        },
    })
}

fn prepare_relink(identity: &Identity, options: &LinkOptions) -> Result<PreparedLink, SessionError> {
    if identity.chain != options.chain {
        return Err(SessionError::InvalidState(format!(
            "identity is linked to {}, not {}",
            identity.chain, options.chain
        )));
    }

    let step = chain::advance(identity.next_id)?;
    debug!(chain = %options.chain, "prepared relink from stored identity");

    Ok(PreparedLink {
        kind: RequestKind::RelinkRequest,
        request_id: step.request_id,
        request: LinkRequest {
            chain: options.chain.clone(),
            request: options.request_details.clone(),
            next_hash: step.next_hash,
            pubkey: None,
            identity_hash: Some(identity.identity_hash.clone()),
        },
        candidate: LinkCandidate {
            chain: identity.chain.clone(),
            identity_hash: Some(identity.identity_hash.clone()),
            shared_secret: identity.shared_secret.clone(),
            next_id: step.next_id,
            requested: identity.requested.clone(),
            app_hash: identity.app_hash.clone(),
            relink: true,
        },
    })
}

/// Turn an accepted `link` reply into the session's new identity.
pub fn complete_link(
    candidate: LinkCandidate,
    response: &LinkResponse,
) -> Result<Identity, SessionError> {
    if response.is_rejected() {
        return Err(SessionError::LinkRejected(response.rejection_reason()));
    }

    if let Some(chain) = response.chain.as_deref() {
        if !chain.is_empty() && chain != candidate.chain {
            return Err(SessionError::Malformed(format!(
                "link reply is for chain {}, requested {}",
                chain, candidate.chain
            )));
        }
    }

    let identity_hash = response
        .identity_hash
        .clone()
        .filter(|h| !h.is_empty())
        .or(candidate.identity_hash)
        .ok_or_else(|| SessionError::Malformed("link reply carries no identity hash".into()))?;

    let mut identity = Identity {
        chain: candidate.chain,
        identity_hash,
        shared_secret: candidate.shared_secret,
        next_id: candidate.next_id,
        requested: candidate.requested,
        app_hash: candidate.app_hash,
    };
    identity.merge_requested(&response.requested);
    Ok(identity)
}
