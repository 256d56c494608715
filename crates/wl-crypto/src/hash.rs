use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash disclosed one step ahead of a hash-chain id: hex(sha256(decimal id)).
pub fn chain_hash(id: u64) -> String {
    sha256_hex(id.to_string().as_bytes())
}

/// Check that `id` is the preimage of a previously disclosed chain hash.
pub fn verify_chain_hash(id: u64, disclosed_hex: &str) -> bool {
    let expected = chain_hash(id);
    constant_time_eq(expected.as_bytes(), disclosed_hex.to_ascii_lowercase().as_bytes())
}
