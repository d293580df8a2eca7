//! Property tests: any single-entry tamper is located exactly.

use custos_test::{events, AuditHarness};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tamper_is_located(len in 1_u64..40, pick in any::<prop::sample::Index>(), rehash in any::<bool>()) {
        let target = pick.index(usize::try_from(len).unwrap()) as u64 + 1;

        let report = runtime().block_on(async {
            let harness = AuditHarness::new();
            harness.append_all(events::admin_actions(len as usize)).await;
            if rehash {
                harness.rehash_without_relink(target);
            } else {
                harness.tamper_field(target);
            }
            harness.service.verify_chain(None, None).await.unwrap()
        });

        // A consistent rehash of the tail entry has no successor to contradict it.
        if rehash && target == len {
            prop_assert!(report.valid);
        } else {
            let expected = if rehash { target + 1 } else { target };
            prop_assert_eq!(report.broken_at_sequence, Some(expected));
        }
    }

    #[test]
    fn untouched_chains_verify(len in 0_usize..60) {
        let report = runtime().block_on(async {
            let harness = AuditHarness::new();
            harness.append_all(events::admin_actions(len)).await;
            harness.service.verify_chain(None, None).await.unwrap()
        });
        prop_assert!(report.valid);
        prop_assert_eq!(report.entries_checked as usize, len);
    }
}
