//! Random correlation and hash-chain ids.

use getrandom::getrandom;

/// Largest integer a JavaScript companion can hold without precision loss.
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("random number generator unavailable")]
pub struct RngError;

/// Draw a random non-zero id in `1..=MAX_SAFE_ID`.
pub fn random_id() -> Result<u64, RngError> {
    loop {
        let mut b = [0u8; 8];
        getrandom(&mut b).map_err(|_| RngError)?;
        let id = u64::from_le_bytes(b) & MAX_SAFE_ID;
        if id != 0 {
            return Ok(id);
        }
    }
}
