//! Integration tests for retention, resolution, anomaly alerts and queries.

use std::time::Duration as StdDuration;

use chrono::Duration;
use custos_audit::{
    AnomalyKind, AnomalySubject, AnomalyThresholds, AuditConfig, AuditError, EntryFilter,
    ExclusionReason,
};
use custos_core::{AuditEvent, EventType, Severity};
use custos_test::{events, AuditHarness, ChainFixture, EventFixture, MockActor};

fn admin(path: &str) -> AuditEvent {
    AuditEvent::admin_action("mock-admin", "10.0.0.1", path, "POST").with_actor(MockActor::admin())
}

#[tokio::test]
async fn archive_flips_only_old_resolved_entries() {
    let harness = AuditHarness::new();
    ChainFixture::new()
        .with_event(EventFixture::new(admin("/admin/a")).days_ago(60).resolved_by("alice"))
        .with_event(EventFixture::new(admin("/admin/b")).days_ago(45))
        .with_event(EventFixture::new(admin("/admin/c")).days_ago(31).resolved_by("alice"))
        .with_event(EventFixture::new(admin("/admin/d")).days_ago(10).resolved_by("alice"))
        .with_event(EventFixture::new(admin("/admin/e")))
        .seed(&harness)
        .await
        .unwrap();

    let report = harness.service.archive_older_than(30).await.unwrap();
    assert_eq!(report.archived, vec![1, 3]);
    assert_eq!(report.archived_count, 2);
    let reasons: Vec<_> = report.excluded.iter().map(|e| (e.sequence, e.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            (2, ExclusionReason::Unresolved),
            (4, ExclusionReason::TooRecent),
            (5, ExclusionReason::TooRecent),
        ]
    );
    assert_eq!(report.checkpoint.as_ref().map(|c| c.sequence), Some(1));

    for seq in [1, 3] {
        let entry = harness.service.get_entry(seq).await.unwrap();
        assert!(entry.archived);
        assert!(entry.is_compacted());
    }
    for seq in [2, 4, 5] {
        assert!(!harness.service.get_entry(seq).await.unwrap().archived);
    }

    // Archiving never breaks verification.
    assert!(harness.service.verify_chain(None, None).await.unwrap().valid);

    let err = report.ensure_complete().unwrap_err();
    assert!(matches!(err, AuditError::ArchiveIneligible { ref excluded } if excluded.len() == 3));

    // A second run has nothing new to archive.
    let again = harness.service.archive_older_than(30).await.unwrap();
    assert!(again.archived.is_empty());
}

#[tokio::test]
async fn explicit_archive_reports_each_reason() {
    let harness = AuditHarness::new();
    ChainFixture::new()
        .with_event(EventFixture::new(admin("/admin/a")).days_ago(60).resolved_by("alice"))
        .with_event(EventFixture::new(admin("/admin/b")).days_ago(60))
        .with_event(EventFixture::new(admin("/admin/c")).days_ago(1).resolved_by("alice"))
        .seed(&harness)
        .await
        .unwrap();

    harness.service.archive_sequences(&[1], 30).await.unwrap();
    let report = harness
        .service
        .archive_sequences(&[1, 2, 3, 99], 30)
        .await
        .unwrap();

    assert!(report.archived.is_empty());
    let reasons: Vec<_> = report.excluded.iter().map(|e| (e.sequence, e.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            (1, ExclusionReason::AlreadyArchived),
            (2, ExclusionReason::Unresolved),
            (3, ExclusionReason::TooRecent),
            (99, ExclusionReason::NotFound),
        ]
    );
}

#[tokio::test]
async fn brute_force_fires_on_third_failure() {
    let config = AuditConfig::builder()
        .anomaly(
            AnomalyThresholds::builder()
                .brute_force(3, StdDuration::from_secs(60))
                .sync_severity(Severity::Medium)
                .build(),
        )
        .build();
    let harness = AuditHarness::with_config(config);

    let emails = ["a@example.com", "b@example.com", "c@example.com"];
    let mut receipts = Vec::new();
    for (i, email) in emails.iter().enumerate() {
        receipts.push(harness.append(AuditEvent::auth_failure(email, "1.2.3.4")).await);
        if i < 2 {
            assert!(harness.alerts.is_empty());
        }
        harness.advance(Duration::seconds(15));
    }

    let flags = harness.alerts.anomalies();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].kind, AnomalyKind::BruteForce);
    assert_eq!(flags[0].subject, AnomalySubject::Ip("1.2.3.4".to_string()));
    assert_eq!(flags[0].trigger_sequence, receipts[2].sequence);
    assert_eq!(flags[0].sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn failures_spread_past_the_window_do_not_fire() {
    let config = AuditConfig::builder()
        .anomaly(
            AnomalyThresholds::builder()
                .brute_force(3, StdDuration::from_secs(60))
                .sync_severity(Severity::Low)
                .build(),
        )
        .build();
    let harness = AuditHarness::with_config(config);

    harness
        .append_spaced(
            events::failed_logins("eve@example.com", "1.2.3.4", 3),
            Duration::seconds(45),
        )
        .await;
    assert_eq!(harness.alerts.count("BRUTE_FORCE"), 0);
}

#[tokio::test]
async fn background_worker_flags_probing() {
    let config = AuditConfig::builder()
        .anomaly(
            AnomalyThresholds::builder()
                .permission_denials(3, StdDuration::from_secs(600))
                .build(),
        )
        .build();
    let harness = AuditHarness::with_config(config);

    harness
        .append_all(events::probing("bob", "10.0.0.2", &["/admin", "/admin/users", "/admin/keys"]))
        .await;
    harness.settle().await;

    let flags = harness.alerts.anomalies();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].kind, AnomalyKind::PrivilegeProbing);
    assert_eq!(flags[0].subject, AnomalySubject::Actor("bob".to_string()));

    let start = harness.now() - Duration::minutes(1);
    let scanned = harness
        .service
        .scan_anomalies(start, harness.now())
        .await
        .unwrap();
    assert_eq!(scanned.len(), 1);
}

#[tokio::test]
async fn resolve_twice_is_a_no_op() {
    let harness = AuditHarness::new();
    let receipt = harness
        .append(AuditEvent::permission_denied("bob", "10.0.0.2", "/admin", "GET"))
        .await;

    let first = harness
        .service
        .resolve_entry(receipt.sequence, "alice", Some("false positive".to_string()))
        .await
        .unwrap();
    harness.advance(Duration::hours(1));
    let second = harness
        .service
        .resolve_entry(receipt.sequence, "alice", Some("false positive".to_string()))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.hash, receipt.hash);
    assert!(harness.service.verify_chain(None, None).await.unwrap().valid);
}

#[tokio::test]
async fn list_and_summary_reflect_the_chain() {
    let harness = AuditHarness::new();
    harness.append_all(events::admin_actions(3)).await;
    harness
        .append_all(events::failed_logins("eve@example.com", "1.2.3.4", 4))
        .await;
    harness
        .append(AuditEvent::csp_violation("5.6.7.8", "https://evil.example"))
        .await;
    harness.service.resolve_entry(1, "alice", None).await.unwrap();

    let failures = harness
        .service
        .list_entries(&EntryFilter::new().with_event_type(EventType::AuthFailure), 1, Some(3))
        .await
        .unwrap();
    assert_eq!(failures.total_count, 4);
    assert_eq!(failures.total_pages(), 2);
    let seqs: Vec<u64> = failures.entries.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![7, 6, 5]);

    let summary = harness.service.summary(None, None, Some(1)).await.unwrap();
    assert_eq!(summary.total, 8);
    assert_eq!(summary.by_event_type.get(&EventType::AuthFailure), Some(&4));
    assert_eq!(summary.failures, 4);
    assert_eq!(summary.unresolved, 7);
    assert_eq!(summary.top_ips.len(), 1);
    assert_eq!(summary.top_ips[0].key, "1.2.3.4");
    assert_eq!(summary.top_ips[0].count, 4);
}
