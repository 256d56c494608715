//! Property tests for correlation id handling.

use proptest::prelude::*;
use serde_json::json;

use crate::messages::{RequestId, ResponseEnvelope};

proptest! {
    /// A companion echoing the id as a string still hits the same registry key.
    #[test]
    fn prop_numeric_and_string_ids_share_key(n in 1u64..(1u64 << 53)) {
        let as_number: RequestId = serde_json::from_value(json!(n)).unwrap();
        let as_string: RequestId = serde_json::from_value(json!(n.to_string())).unwrap();
        prop_assert_eq!(as_number.key(), as_string.key());
        prop_assert_eq!(as_string.as_u64(), Some(n));
    }

    /// Unknown response fields never break envelope parsing.
    #[test]
    fn prop_response_ignores_extra_fields(n in 1u64..1_000_000, extra in "[a-z]{1,8}") {
        let mut raw = json!({"id": n, "payload": {"ok": true}, "encrypted": false});
        raw[format!("x_{}", extra)] = json!(1);
        let env: ResponseEnvelope = serde_json::from_value(raw).unwrap();
        prop_assert_eq!(env.id.map(|id| id.key()), Some(n.to_string()));
    }
}
