//! Property-based checks for the universal invariants in the spec's
//! testable-properties section: identity graph transitivity, rolling
//! counter monotonicity in window size, and config validation.

use std::time::Duration;

use cdp_core::config::PipelineConfig;
use cdp_core::counter::RollingCounter;
use cdp_core::identity::IdentityGraph;
use cdp_core::Timestamp;
use proptest::prelude::*;

proptest! {
    #[test]
    fn identity_union_is_transitive_across_chained_unions(
        ids in proptest::collection::vec("[a-z]{1,8}", 2..12),
    ) {
        let graph = IdentityGraph::new();
        for pair in ids.windows(2) {
            graph.union(&pair[0], &pair[1]);
        }
        let roots: Vec<String> = ids.iter().map(|id| graph.find(id)).collect();
        let first = roots[0].clone();
        prop_assert!(roots.iter().all(|r| *r == first));
    }

    #[test]
    fn canonical_id_for_single_identifier_is_stable_across_calls(
        id in "[a-z]{1,10}",
    ) {
        let graph = IdentityGraph::new();
        let a = graph.canonical_id_for(&[id.as_str()]).expect("non-empty");
        let b = graph.canonical_id_for(&[id.as_str()]).expect("non-empty");
        prop_assert_eq!(a, b);
    }

    #[test]
    fn rolling_counter_is_monotone_in_window_size(
        appends in proptest::collection::vec(0i64..2000, 0..50),
        narrow_secs in 1u64..500,
        widen_by_secs in 0u64..2000,
    ) {
        let counter = RollingCounter::new(Duration::from_secs(60), Duration::from_secs(100_000));
        let profile_id = "user:p1".to_string();
        for secs in &appends {
            counter.append(&profile_id, "X", Timestamp::from_secs(*secs));
        }
        let now = Timestamp::from_secs(2000);
        let narrow = counter.count(&profile_id, "X", Duration::from_secs(narrow_secs), now);
        let wide = counter.count(
            &profile_id,
            "X",
            Duration::from_secs(narrow_secs + widen_by_secs),
            now,
        );
        prop_assert!(narrow <= wide);
    }

    #[test]
    fn config_rejects_processing_window_past_grace_period(
        processing_secs in 1u64..10_000,
        grace_secs in 1u64..10_000,
    ) {
        let config = PipelineConfig::builder()
            .processing_window(Duration::from_secs(processing_secs))
            .grace_period(Duration::from_secs(grace_secs))
            .build();
        let result = config.validate();
        if processing_secs > grace_secs {
            prop_assert!(result.is_err());
        } else {
            prop_assert!(result.is_ok());
        }
    }
}
