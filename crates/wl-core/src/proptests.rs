//! Property tests for the registry and the hash-chain cursor.

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;
use wl_crypto::hash::verify_chain_hash;
use wl_proto::{RequestId, RequestKind};

use crate::chain;
use crate::registry::{Registration, RequestRegistry};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every reply reaches the caller registered under its id, whatever the
    /// arrival order and id spelling.
    #[test]
    fn prop_replies_route_to_their_callers(
        ids in proptest::collection::hash_set(1u64..1_000_000, 1..16),
        as_text in any::<bool>(),
    ) {
        let mut registry = RequestRegistry::new();
        let mut receivers = Vec::new();
        for id in &ids {
            let rx = registry
                .register(&RequestId::Number(*id), Registration::new(RequestKind::Api))
                .unwrap();
            receivers.push((*id, rx));
        }

        let mut order: Vec<u64> = ids.iter().copied().collect();
        order.reverse();
        for id in order {
            let wire = if as_text { RequestId::Text(id.to_string()) } else { RequestId::Number(id) };
            let entry = registry.take(&wire).unwrap();
            prop_assert!(entry.resolve(json!(id)));
            prop_assert!(registry.take(&wire).is_none());
        }
        prop_assert!(registry.is_empty());

        for (id, mut rx) in receivers {
            prop_assert_eq!(rx.try_recv().unwrap(), Ok(json!(id)));
        }
    }

    /// Walking the chain, each revealed id matches the hash disclosed one
    /// step earlier and ids never repeat back to back.
    #[test]
    fn prop_chain_walk(steps in 1usize..12) {
        let mut step = chain::fresh().unwrap();
        let mut seen = HashSet::new();
        seen.insert(step.request_id);
        for _ in 0..steps {
            let next = chain::advance(step.next_id).unwrap();
            prop_assert!(verify_chain_hash(next.request_id, &step.next_hash));
            prop_assert_ne!(next.request_id, next.next_id);
            seen.insert(next.request_id);
            step = next;
        }
        prop_assert!(seen.len() > 1);
    }
}
