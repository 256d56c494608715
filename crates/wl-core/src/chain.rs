//! Hash-chain cursor.
//!
//! Each correlated request consumes the current cursor as its id and
//! discloses the hash of a freshly drawn successor. The companion checks the
//! next id it sees against the hash it was given one step earlier.

use wl_crypto::{hash::chain_hash, ids::random_id};

use crate::errors::SessionError;

/// One step of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    /// Id the current request is sent under
    pub request_id: u64,
    /// New cursor, revealed by the following request
    pub next_id: u64,
    /// hash(next_id), sent with the current request
    pub next_hash: String,
}

/// Consume `cursor` and draw its successor.
pub fn advance(cursor: u64) -> Result<ChainStep, SessionError> {
    let mut next_id = random_id()?;
    while next_id == cursor {
        next_id = random_id()?;
    }
    Ok(ChainStep {
        request_id: cursor,
        next_hash: chain_hash(next_id),
        next_id,
    })
}

/// Start a new chain with a random request id.
pub fn fresh() -> Result<ChainStep, SessionError> {
    advance(random_id()?)
}
