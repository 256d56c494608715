//! Validation helpers for link protocol fields.

use crate::messages::LinkRequest;

/// Validation error types for protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty
    EmptyField { field: &'static str },
    /// Field has invalid size (expected, actual)
    InvalidSize { field: &'static str, expected: usize, actual: usize },
    /// Field size is out of allowed range
    SizeOutOfRange { field: &'static str, min: usize, max: usize, actual: usize },
    /// Field contains invalid data
    InvalidData { field: &'static str, reason: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "required field '{}' is empty", field),
            Self::InvalidSize { field, expected, actual } => {
                write!(f, "field '{}' has invalid size: expected {}, got {}", field, expected, actual)
            }
            Self::SizeOutOfRange { field, min, max, actual } => {
                write!(f, "field '{}' size {} is out of range [{}, {}]", field, actual, min, max)
            }
            Self::InvalidData { field, reason } => {
                write!(f, "field '{}' contains invalid data: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Constants for field sizes.
pub mod sizes {
    /// Hex length of an X25519 public key.
    pub const PUBKEY_HEX_LEN: usize = 64;
    /// Hex length of a SHA-256 digest.
    pub const HASH_HEX_LEN: usize = 64;
    /// Longest accepted chain symbol.
    pub const MAX_CHAIN_LEN: usize = 16;
    /// Most data fields a single link request may ask for.
    pub const MAX_REQUESTED_FIELDS: usize = 32;
}

/// Chain symbols are short upper-case tickers such as `BTS` or `BTS_TEST`.
pub fn validate_chain(chain: &str) -> ValidationResult<()> {
    if chain.is_empty() {
        return Err(ValidationError::EmptyField { field: "chain" });
    }
    if chain.len() > sizes::MAX_CHAIN_LEN {
        return Err(ValidationError::SizeOutOfRange {
            field: "chain",
            min: 1,
            max: sizes::MAX_CHAIN_LEN,
            actual: chain.len(),
        });
    }
    if !chain
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::InvalidData {
            field: "chain",
            reason: "expected upper-case ticker",
        });
    }
    Ok(())
}

/// Hex-encoded value of a fixed length.
pub fn validate_hex(field: &'static str, value: &str, expected_len: usize) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if value.len() != expected_len {
        return Err(ValidationError::InvalidSize {
            field,
            expected: expected_len,
            actual: value.len(),
        });
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidData {
            field,
            reason: "not hex",
        });
    }
    Ok(())
}

/// Requested field names: at least one, bounded, none blank.
pub fn validate_requested_fields(fields: &[String]) -> ValidationResult<()> {
    if fields.is_empty() {
        return Err(ValidationError::EmptyField { field: "request" });
    }
    if fields.len() > sizes::MAX_REQUESTED_FIELDS {
        return Err(ValidationError::SizeOutOfRange {
            field: "request",
            min: 1,
            max: sizes::MAX_REQUESTED_FIELDS,
            actual: fields.len(),
        });
    }
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(ValidationError::InvalidData {
            field: "request",
            reason: "blank field name",
        });
    }
    Ok(())
}

/// Check a link request before it goes on the wire.
pub fn validate_link_request(req: &LinkRequest) -> ValidationResult<()> {
    validate_chain(&req.chain)?;
    validate_requested_fields(&req.request)?;
    validate_hex("next_hash", &req.next_hash, sizes::HASH_HEX_LEN)?;
    match (&req.pubkey, &req.identity_hash) {
        (Some(pubkey), None) => validate_hex("pubkey", pubkey, sizes::PUBKEY_HEX_LEN),
        (None, Some(hash)) if !hash.is_empty() => Ok(()),
        (None, Some(_)) => Err(ValidationError::EmptyField { field: "identityhash" }),
        (Some(_), Some(_)) => Err(ValidationError::InvalidData {
            field: "pubkey",
            reason: "relink requests must not carry a key agreement public key",
        }),
        (None, None) => Err(ValidationError::EmptyField { field: "pubkey" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LinkRequest {
        LinkRequest {
            chain: "BTS".into(),
            request: vec!["account".into()],
            next_hash: "a".repeat(64),
            pubkey: Some("b".repeat(64)),
            identity_hash: None,
        }
    }

    #[test]
    fn test_chain_validation() {
        assert!(validate_chain("BTS").is_ok());
        assert!(validate_chain("BTS_TEST").is_ok());
        assert!(matches!(validate_chain(""), Err(ValidationError::EmptyField { .. })));
        assert!(matches!(validate_chain("bts"), Err(ValidationError::InvalidData { .. })));
        assert!(matches!(
            validate_chain("ABCDEFGHIJKLMNOPQ"),
            Err(ValidationError::SizeOutOfRange { .. })
        ));
    }

    #[test]
    fn test_hex_validation() {
        assert!(validate_hex("pubkey", &"0f".repeat(32), 64).is_ok());
        assert_eq!(
            validate_hex("pubkey", "0f", 64),
            Err(ValidationError::InvalidSize { field: "pubkey", expected: 64, actual: 2 })
        );
        assert!(validate_hex("pubkey", &"zz".repeat(32), 64).is_err());
    }

    #[test]
    fn test_link_request_validation() {
        assert!(validate_link_request(&request()).is_ok());

        let mut relink = request();
        relink.pubkey = None;
        relink.identity_hash = Some("hash".into());
        assert!(validate_link_request(&relink).is_ok());

        let mut both = request();
        both.identity_hash = Some("hash".into());
        assert!(validate_link_request(&both).is_err());

        let mut neither = request();
        neither.pubkey = None;
        assert!(validate_link_request(&neither).is_err());

        let mut no_fields = request();
        no_fields.request.clear();
        assert!(validate_link_request(&no_fields).is_err());
    }

    #[test]
    fn test_error_display() {
        let e = ValidationError::EmptyField { field: "chain" };
        assert_eq!(e.to_string(), "required field 'chain' is empty");
    }
}
