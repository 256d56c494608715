//! Property tests for the api cipher and hash chain.

use proptest::prelude::*;
use serde_json::{json, Value};

use crate::cipher::MessageCipher;
use crate::hash::{chain_hash, verify_chain_hash};
use crate::hotp::Hotp;
use crate::ids::MAX_SAFE_ID;

fn json_payload() -> impl Strategy<Value = Value> {
    ("[a-zA-Z]{1,12}", any::<i64>(), proptest::collection::vec(any::<u32>(), 0..8))
        .prop_map(|(method, n, list)| json!({"method": method, "params": {"n": n, "list": list}}))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// decrypt(encrypt(p, id), id) == p for a fresh id
    #[test]
    fn prop_cipher_round_trip(
        secret in proptest::collection::vec(any::<u8>(), 16..64),
        counter in 1u64..=MAX_SAFE_ID,
        payload in json_payload(),
    ) {
        let mut sender = MessageCipher::new(&secret).unwrap();
        let receiver = MessageCipher::new(&secret).unwrap();
        let blob = sender.encrypt(counter, &payload).unwrap();
        prop_assert_eq!(receiver.decrypt(counter, &blob).unwrap(), payload);
    }

    /// A ciphertext never opens under a different counter.
    #[test]
    fn prop_cipher_counter_binding(
        counter in 1u64..MAX_SAFE_ID,
        delta in 1u64..1000,
    ) {
        let mut sender = MessageCipher::new(&[7u8; 32]).unwrap();
        let blob = sender.encrypt(counter, &json!({"x": 1})).unwrap();
        let other = counter.wrapping_add(delta);
        prop_assert!(sender.decrypt(other, &blob).is_err());
    }

    /// The disclosed hash always verifies its own preimage and nothing nearby.
    #[test]
    fn prop_chain_hash_binds_id(id in 1u64..=MAX_SAFE_ID) {
        let disclosed = chain_hash(id);
        prop_assert!(verify_chain_hash(id, &disclosed));
        prop_assert!(!verify_chain_hash(id ^ 1, &disclosed));
    }

    /// Link codes are always full width decimal strings.
    #[test]
    fn prop_link_codes_fixed_width(counter in any::<u64>()) {
        let hotp = Hotp::for_link(b"shared secret").unwrap();
        let code = hotp.generate(counter);
        prop_assert_eq!(code.len(), 32);
        prop_assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
