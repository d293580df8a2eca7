//! A ready-to-use audit service over an in-memory store and a manual clock.
//!
//! # Examples
//!
//! ```rust
//! use custos_test::{assert_contiguous, AuditHarness, events};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let harness = AuditHarness::new();
//! let receipts = harness.append_all(events::admin_actions(3)).await;
//! assert_contiguous(&receipts, 1);
//!
//! harness.tamper_field(2);
//! let report = harness.service.verify_chain(None, None).await.unwrap();
//! assert_eq!(report.broken_at_sequence, Some(2));
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use custos_audit::{AppendReceipt, AuditConfig, AuditService, InMemoryAlertSink, VerificationReport};
use custos_core::{AuditEvent, Clock, ManualClock};
use custos_store::MemoryChainStore;

/// Service, store, clock and alert sink wired together for tests.
///
/// The clock starts at the current wall time truncated to whole seconds.
#[derive(Debug)]
pub struct AuditHarness {
    /// The service under test.
    pub service: AuditService,
    /// The backing store, for tampering.
    pub store: Arc<MemoryChainStore>,
    /// The service clock.
    pub clock: Arc<ManualClock>,
    /// Every alert the service raised.
    pub alerts: Arc<InMemoryAlertSink>,
}

impl AuditHarness {
    /// Creates a harness with the default configuration.
    ///
    /// # Panics
    ///
    /// Never with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AuditConfig::default())
    }

    /// Creates a harness with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn with_config(config: AuditConfig) -> Self {
        let store = Arc::new(MemoryChainStore::new());
        let start = Utc::now();
        let start = start - Duration::nanoseconds(i64::from(start.timestamp_subsec_nanos()));
        let clock = Arc::new(ManualClock::new(start));
        let alerts = Arc::new(InMemoryAlertSink::new());

        let service = AuditService::builder(store.clone())
            .clock(clock.clone())
            .config(config)
            .alert_sink(alerts.clone())
            .build()
            .unwrap_or_else(|e| panic!("invalid harness config: {e}"));

        Self {
            service,
            store,
            clock,
            alerts,
        }
    }

    /// Current harness time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Appends one event.
    ///
    /// # Panics
    ///
    /// Panics if the append fails.
    pub async fn append(&self, event: AuditEvent) -> AppendReceipt {
        self.service
            .submit_event(event)
            .await
            .unwrap_or_else(|e| panic!("append failed: {e}"))
    }

    /// Appends events in order.
    ///
    /// # Panics
    ///
    /// Panics if any append fails.
    pub async fn append_all(&self, events: impl IntoIterator<Item = AuditEvent>) -> Vec<AppendReceipt> {
        let mut receipts = Vec::new();
        for event in events {
            receipts.push(self.append(event).await);
        }
        receipts
    }

    /// Appends events `spacing` apart, starting now.
    ///
    /// # Panics
    ///
    /// Panics if any append fails.
    pub async fn append_spaced(
        &self,
        events: impl IntoIterator<Item = AuditEvent>,
        spacing: Duration,
    ) -> Vec<AppendReceipt> {
        let mut receipts = Vec::new();
        for event in events {
            receipts.push(self.append(event).await);
            self.advance(spacing);
        }
        receipts
    }

    /// Changes a hashed field of entry `sequence` without touching any hash,
    /// the way an attacker editing a row directly would.
    ///
    /// # Panics
    ///
    /// Panics if there is no such entry.
    pub fn tamper_field(&self, sequence: u64) {
        let found = self.store.tamper(sequence, |entry| {
            entry.success = !entry.success;
            entry.error_message = None;
        });
        assert!(found, "no entry at sequence {sequence}");
    }

    /// Changes entry `sequence` and recomputes its own hash, but leaves the
    /// successor's `prev_hash` pointing at the old one.
    ///
    /// # Panics
    ///
    /// Panics if there is no such entry.
    pub fn rehash_without_relink(&self, sequence: u64) {
        let found = self.store.tamper(sequence, |entry| {
            entry.network.ip = "127.0.0.1".to_string();
            entry.hash = entry.recompute_hash(&entry.prev_hash);
        });
        assert!(found, "no entry at sequence {sequence}");
    }

    /// Waits for background anomaly evaluation to catch up.
    pub async fn settle(&self) {
        self.service.flush_anomalies().await;
    }
}

impl Default for AuditHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Asserts receipts carry the sequences `first, first + 1, ...` in some order.
///
/// # Panics
///
/// Panics on a duplicate or a gap.
pub fn assert_contiguous(receipts: &[AppendReceipt], first: u64) {
    let mut sequences: Vec<u64> = receipts.iter().map(|r| r.sequence).collect();
    sequences.sort_unstable();
    let expected: Vec<u64> = (first..first + receipts.len() as u64).collect();
    assert_eq!(sequences, expected, "sequences are not contiguous");
}

/// Asserts a report found its first break at `sequence`.
///
/// # Panics
///
/// Panics if the report is valid or broke elsewhere.
pub fn assert_broken_at(report: &VerificationReport, sequence: u64) {
    assert!(!report.valid, "expected a broken chain, report was valid");
    assert_eq!(report.broken_at_sequence, Some(sequence), "{report:?}");
}
