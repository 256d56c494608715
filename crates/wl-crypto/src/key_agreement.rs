//! X25519 key agreement for the initial link.
//!
//! The companion publishes a public key in its `authenticated` reply. The
//! client answers with an ephemeral public key and both ends derive the same
//! shared secret, which seeds the api cipher for the lifetime of the link.

use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KeyAgreementError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(&'static str),
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
}

/// Decode a hex X25519 public key.
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey, KeyAgreementError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|_| KeyAgreementError::InvalidPublicKey("not hex"))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KeyAgreementError::InvalidPublicKey("expected 32 bytes"))?;
    Ok(PublicKey::from(arr))
}

/// Outcome of one key agreement: what to send, and what to keep.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyAgreement {
    public_key: String,
    shared_secret: String,
}

impl KeyAgreement {
    /// Ephemeral public key, hex, for the link request.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Shared secret, hex, for the identity.
    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("public_key", &self.public_key)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

/// Run an ephemeral agreement against the companion's published key.
pub fn agree(remote_public_hex: &str) -> Result<KeyAgreement, KeyAgreementError> {
    let remote = parse_public_key(remote_public_hex)?;

    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&remote);
    if !shared.was_contributory() {
        return Err(KeyAgreementError::NonContributory);
    }

    Ok(KeyAgreement {
        public_key: hex::encode(public.as_bytes()),
        shared_secret: hex::encode(shared.as_bytes()),
    })
}

/// Long-lived key pair of the side that publishes its key.
pub struct StaticKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl StaticKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Shared secret (hex) with a peer's ephemeral public key.
    pub fn shared_secret_hex(&self, peer_public_hex: &str) -> Result<String, KeyAgreementError> {
        let peer = parse_public_key(peer_public_hex)?;
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(KeyAgreementError::NonContributory);
        }
        Ok(hex::encode(shared.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_secret() {
        let companion = StaticKeyPair::generate();
        let agreement = agree(&companion.public_key_hex()).unwrap();

        let companion_side = companion.shared_secret_hex(agreement.public_key()).unwrap();
        assert_eq!(agreement.shared_secret(), companion_side);
        assert_eq!(agreement.shared_secret().len(), 64);
    }

    #[test]
    fn test_each_agreement_is_fresh() {
        let companion = StaticKeyPair::generate();
        let a = agree(&companion.public_key_hex()).unwrap();
        let b = agree(&companion.public_key_hex()).unwrap();
        assert_ne!(a.public_key(), b.public_key());
        assert_ne!(a.shared_secret(), b.shared_secret());
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert_eq!(
            agree("xyz").unwrap_err(),
            KeyAgreementError::InvalidPublicKey("not hex")
        );
        assert_eq!(
            agree("abcd").unwrap_err(),
            KeyAgreementError::InvalidPublicKey("expected 32 bytes")
        );
    }

    #[test]
    fn test_rejects_low_order_point() {
        // The all-zero point yields an all-zero shared secret
        let zero = hex::encode([0u8; 32]);
        assert_eq!(agree(&zero).unwrap_err(), KeyAgreementError::NonContributory);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let companion = StaticKeyPair::generate();
        let agreement = agree(&companion.public_key_hex()).unwrap();
        let printed = format!("{:?}", agreement);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(agreement.shared_secret()));
    }
}
