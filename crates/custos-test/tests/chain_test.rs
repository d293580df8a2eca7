//! Integration tests for appending and verifying the chain.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use custos_audit::{AuditConfig, BreakKind, RetryPolicy};
use custos_core::{AuditEvent, GENESIS_HASH};
use custos_test::{assert_broken_at, assert_contiguous, events, AuditHarness};
use futures::future::join_all;

fn contended_config() -> AuditConfig {
    AuditConfig::builder()
        .retry(
            RetryPolicy::builder()
                .max_attempts(1_000)
                .base_delay(StdDuration::from_millis(1))
                .max_delay(StdDuration::from_millis(5))
                .build(),
        )
        .serialize_local_appends(false)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_are_contiguous_without_local_lock() {
    let harness = Arc::new(AuditHarness::with_config(contended_config()));
    let seeded = harness.append_all(events::admin_actions(5)).await;
    assert_contiguous(&seeded, 1);

    let tasks = (0..8).map(|caller| {
        let harness = harness.clone();
        tokio::spawn(async move {
            let mut receipts = Vec::new();
            for i in 0..10 {
                let event = AuditEvent::permission_denied(
                    &format!("user-{caller}"),
                    "10.0.0.2",
                    &format!("/admin/{i}"),
                    "GET",
                );
                receipts.push(harness.append(event).await);
            }
            receipts
        })
    });

    let receipts: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    assert_eq!(receipts.len(), 80);
    assert_contiguous(&receipts, 6);

    let report = harness.service.verify_chain(None, None).await.unwrap();
    assert!(report.valid, "{report:?}");
    assert_eq!(report.entries_checked, 85);
}

#[tokio::test]
async fn concurrent_appends_are_contiguous_with_local_lock() {
    let harness = AuditHarness::new();

    let receipts = join_all(
        events::failed_logins("eve@example.com", "203.0.113.5", 25)
            .into_iter()
            .map(|event| harness.service.submit_event(event)),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .unwrap();

    assert_contiguous(&receipts, 1);
    assert!(receipts.iter().all(|r| r.attempts == 1));
}

#[tokio::test]
async fn untouched_hundred_entry_chain_verifies() {
    let harness = AuditHarness::new();
    harness.append_all(events::admin_actions(100)).await;

    let report = harness.service.verify_chain(Some(1), Some(100)).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.entries_checked, 100);
    assert_eq!((report.from_sequence, report.to_sequence), (1, 100));
    assert!(harness.alerts.is_empty());

    let first = harness.service.get_entry(1).await.unwrap();
    assert_eq!(first.prev_hash, GENESIS_HASH);
    let last = harness.service.get_entry(100).await.unwrap();
    assert_eq!(last.recompute_hash(&last.prev_hash), last.hash);
}

#[tokio::test]
async fn tampered_field_breaks_at_that_entry() {
    let harness = AuditHarness::new();
    harness.append_all(events::admin_actions(10)).await;

    harness.tamper_field(7);
    let report = harness.service.verify_chain(None, None).await.unwrap();
    assert_broken_at(&report, 7);
    assert_eq!(report.break_kind, Some(BreakKind::HashMismatch));
    assert_eq!(harness.alerts.count("CHAIN_BROKEN"), 1);

    // A range that ends before the tampered entry is still intact.
    let before = harness.service.verify_chain(Some(2), Some(6)).await.unwrap();
    assert!(before.valid);
}

#[tokio::test]
async fn rehash_without_relink_breaks_at_successor() {
    let harness = AuditHarness::new();
    harness.append_all(events::admin_actions(10)).await;

    harness.rehash_without_relink(4);
    let report = harness.service.verify_chain(None, None).await.unwrap();
    assert_broken_at(&report, 5);
    assert_eq!(report.break_kind, Some(BreakKind::LinkMismatch));
}

#[tokio::test]
async fn deleted_entry_is_a_gap() {
    let harness = AuditHarness::new();
    harness.append_all(events::admin_actions(6)).await;

    assert!(harness.store.purge(3).is_some());
    let report = harness.service.verify_chain(None, None).await.unwrap();
    assert_broken_at(&report, 3);
    assert_eq!(report.break_kind, Some(BreakKind::Gap));
}
