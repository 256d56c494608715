//! Per-message api cipher.
//!
//! Keys are derived per correlation id: the HOTP code for counter = id is
//! stretched with HKDF-SHA256 (salt = shared secret) into a ChaCha20Poly1305
//! key. The counter is also bound as AAD, so a ciphertext opened under the
//! wrong counter fails authentication.
//!
//! Blob format on the wire: hex(nonce(12) || ciphertext+tag)

use std::collections::HashSet;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::hotp::Hotp;

const KEY_INFO: &[u8] = b"wl_api_key_v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Error type for api cipher operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid shared secret")]
    InvalidSecret,
    #[error("counter {0} was already used for encryption")]
    CounterReuse(u64),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid blob: {0}")]
    InvalidBlob(&'static str),
    #[error("payload serialization failed: {0}")]
    Serialization(String),
    #[error("RNG failed")]
    RngError,
}

/// Session cipher seeded once from the link's shared secret.
///
/// Counter reuse is refused per instance: the set of used counters lives and
/// dies with this value, growing by one entry per encrypted message. The
/// session keeps one instance for as long as a link stays up, including
/// across relinks under the same secret; uniqueness beyond that rests on the
/// hash chain never repeating an id.
pub struct MessageCipher {
    otp: Hotp,
    secret: Zeroizing<Vec<u8>>,
    /// Counters this instance has encrypted under
    used_counters: HashSet<u64>,
}

impl MessageCipher {
    pub fn new(shared_secret: &[u8]) -> Result<Self, CipherError> {
        let otp = Hotp::for_link(shared_secret).map_err(|_| CipherError::InvalidSecret)?;
        Ok(Self {
            otp,
            secret: Zeroizing::new(shared_secret.to_vec()),
            used_counters: HashSet::new(),
        })
    }

    /// Seed from the hex-encoded secret stored in an identity.
    pub fn from_hex(secret_hex: &str) -> Result<Self, CipherError> {
        let secret = Zeroizing::new(
            hex::decode(secret_hex.trim()).map_err(|_| CipherError::InvalidSecret)?,
        );
        Self::new(&secret)
    }

    fn message_key(&self, counter: u64) -> Zeroizing<[u8; 32]> {
        let code = Zeroizing::new(self.otp.generate(counter));
        let hk = Hkdf::<Sha256>::new(Some(self.secret.as_slice()), code.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(KEY_INFO, &mut key[..])
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        key
    }

    fn aead(&self, counter: u64) -> ChaCha20Poly1305 {
        let key = self.message_key(counter);
        ChaCha20Poly1305::new(Key::from_slice(&key[..]))
    }

    /// Encrypt a JSON payload under `counter`. A counter is accepted once.
    pub fn encrypt(&mut self, counter: u64, payload: &Value) -> Result<String, CipherError> {
        if self.used_counters.contains(&counter) {
            return Err(CipherError::CounterReuse(counter));
        }

        let plaintext = Zeroizing::new(
            serde_json::to_vec(payload).map_err(|e| CipherError::Serialization(e.to_string()))?,
        );

        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|_| CipherError::RngError)?;

        let aad = counter.to_be_bytes();
        let ct = self
            .aead(counter)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        self.used_counters.insert(counter);

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(hex::encode(out))
    }

    /// Decrypt a hex blob produced under `counter`.
    pub fn decrypt(&self, counter: u64, blob_hex: &str) -> Result<Value, CipherError> {
        let blob = hex::decode(blob_hex.trim()).map_err(|_| CipherError::InvalidBlob("not hex"))?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::InvalidBlob("too short"));
        }
        let (nonce, ct) = blob.split_at(NONCE_LEN);

        let aad = counter.to_be_bytes();
        let plaintext = Zeroizing::new(
            self.aead(counter)
                .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: &aad })
                .map_err(|_| CipherError::DecryptionFailed)?,
        );

        serde_json::from_slice(&plaintext).map_err(|e| CipherError::Serialization(e.to_string()))
    }

    /// Number of counters consumed by [`MessageCipher::encrypt`].
    pub fn encrypted_count(&self) -> usize {
        self.used_counters.len()
    }
}
