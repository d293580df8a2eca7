//! Anomaly detection over the audit chain.
//!
//! Detection is read-only: it never appends to or mutates the chain, it
//! only produces [`AnomalyFlag`]s for the alert sinks.
//!
//! Rules, each counted over a window ending at the triggering entry and
//! limited to entries at or before the trigger's sequence:
//!
//! | Kind                  | Trigger              | Condition                                 |
//! |-----------------------|----------------------|-------------------------------------------|
//! | `BRUTE_FORCE`         | `AUTH_FAILURE`       | >= K failures for the same actor or IP    |
//! | `SUSPICIOUS_ACTIVITY` | any entry with actor | >= M distinct IPs for the actor           |
//! | `PRIVILEGE_PROBING`   | `PERMISSION_DENIED`  | >= P denials for the same actor           |

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use custos_core::{AuditLogEntry, EventType};
use custos_store::ChainStore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AnomalyThresholds;
use crate::error::{AuditError, Result};

/// Kind of anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    /// Repeated authentication failures.
    BruteForce,
    /// One actor seen from many addresses.
    SuspiciousActivity,
    /// Repeated permission denials.
    PrivilegeProbing,
}

impl AnomalyKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BruteForce => "BRUTE_FORCE",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::PrivilegeProbing => "PRIVILEGE_PROBING",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an anomaly is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnomalySubject {
    /// An actor key (user id, or email when there is no user id).
    Actor(String),
    /// A client IP address.
    Ip(String),
}

impl fmt::Display for AnomalySubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor(actor) => write!(f, "actor {actor}"),
            Self::Ip(ip) => write!(f, "ip {ip}"),
        }
    }
}

/// A detected anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    /// Rule that fired.
    pub kind: AnomalyKind,
    /// Actor or IP the rule fired for.
    pub subject: AnomalySubject,
    /// Entry that tipped the count over the threshold.
    pub trigger_sequence: u64,
    /// Matching entries (or distinct IPs) counted in the window.
    pub count: u64,
    /// Start of the window.
    pub window_start: DateTime<Utc>,
    /// End of the window (the trigger's timestamp).
    pub window_end: DateTime<Utc>,
    /// Sequences of the entries that matched, ascending.
    pub sequences: Vec<u64>,
}

/// Evaluates the rules for `trigger` against `history`.
///
/// `history` must hold entries with sequence at or below the trigger's, in
/// any order; entries outside a rule's window are ignored.
#[must_use]
pub fn evaluate_rules(
    trigger: &AuditLogEntry,
    history: &[AuditLogEntry],
    thresholds: &AnomalyThresholds,
) -> Vec<AnomalyFlag> {
    let mut flags = Vec::new();
    let end = trigger.timestamp;
    let in_window = |entry: &AuditLogEntry, window: Duration| {
        entry.sequence <= trigger.sequence
            && entry.timestamp >= end - window
            && entry.timestamp <= end
    };
    let flag = |kind, subject, count, window: Duration, sequences: Vec<u64>| AnomalyFlag {
        kind,
        subject,
        trigger_sequence: trigger.sequence,
        count,
        window_start: end - window,
        window_end: end,
        sequences,
    };

    if trigger.event_type == EventType::AuthFailure {
        let window = thresholds.brute_force_window();
        let failures: Vec<&AuditLogEntry> = history
            .iter()
            .filter(|e| e.event_type == EventType::AuthFailure && in_window(*e, window))
            .collect();

        if let Some(actor) = trigger.actor_key() {
            let seqs = sequences(
                failures
                    .iter()
                    .copied()
                    .filter(|e| e.actor_key() == Some(actor)),
            );
            if seqs.len() >= thresholds.brute_force_failures as usize {
                flags.push(flag(
                    AnomalyKind::BruteForce,
                    AnomalySubject::Actor(actor.to_string()),
                    seqs.len() as u64,
                    window,
                    seqs,
                ));
            }
        }

        let ip = trigger.network.ip.as_str();
        let seqs = sequences(failures.iter().copied().filter(|e| e.network.ip == ip));
        if seqs.len() >= thresholds.brute_force_failures as usize {
            flags.push(flag(
                AnomalyKind::BruteForce,
                AnomalySubject::Ip(ip.to_string()),
                seqs.len() as u64,
                window,
                seqs,
            ));
        }
    }

    if let Some(actor) = trigger.actor_key() {
        let window = thresholds.distinct_ip_window();
        let mut ips = HashSet::new();
        let seqs = sequences(history.iter().filter(|e| {
            in_window(*e, window)
                && e.actor_key() == Some(actor)
                && ips.insert(e.network.ip.clone())
        }));
        if ips.len() >= thresholds.distinct_ips as usize {
            flags.push(flag(
                AnomalyKind::SuspiciousActivity,
                AnomalySubject::Actor(actor.to_string()),
                ips.len() as u64,
                window,
                seqs,
            ));
        }

        if trigger.event_type == EventType::PermissionDenied {
            let window = thresholds.permission_denial_window();
            let seqs = sequences(history.iter().filter(|e| {
                e.event_type == EventType::PermissionDenied
                    && in_window(*e, window)
                    && e.actor_key() == Some(actor)
            }));
            if seqs.len() >= thresholds.permission_denials as usize {
                flags.push(flag(
                    AnomalyKind::PrivilegeProbing,
                    AnomalySubject::Actor(actor.to_string()),
                    seqs.len() as u64,
                    window,
                    seqs,
                ));
            }
        }
    }

    flags
}

fn sequences<'a>(entries: impl Iterator<Item = &'a AuditLogEntry>) -> Vec<u64> {
    entries
        .map(|e| e.sequence)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Stateless detector reading from a [`ChainStore`].
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    store: Arc<dyn ChainStore>,
    thresholds: AnomalyThresholds,
    batch_size: usize,
}

impl AnomalyDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>, thresholds: AnomalyThresholds, batch_size: usize) -> Self {
        Self {
            store,
            thresholds,
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> &AnomalyThresholds {
        &self.thresholds
    }

    /// Evaluates the rules for one freshly appended entry.
    ///
    /// Reads backwards from the trigger and stops at the first entry older
    /// than the widest rule window.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn evaluate(&self, trigger: &AuditLogEntry) -> Result<Vec<AnomalyFlag>> {
        let horizon = trigger.timestamp - self.thresholds.widest_window();
        let mut history = Vec::new();
        let mut upper = trigger.sequence;

        'outer: while upper > 0 {
            let lower = upper.saturating_sub(self.batch_size as u64 - 1).max(1);
            let batch = self.store.range(lower, upper, self.batch_size).await?;
            for entry in batch.into_iter().rev() {
                if entry.timestamp < horizon {
                    break 'outer;
                }
                history.push(entry);
            }
            upper = lower - 1;
        }

        let flags = evaluate_rules(trigger, &history, &self.thresholds);
        for flag in &flags {
            debug!(
                kind = %flag.kind,
                subject = %flag.subject,
                sequence = flag.trigger_sequence,
                count = flag.count,
                "Anomaly detected"
            );
        }
        Ok(flags)
    }

    /// Scans every entry timestamped within `since..=until` and returns one
    /// flag per rule and subject, the earliest that fired.
    ///
    /// Only entries inside the scanned window count towards thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] if `cancel` fires between batches,
    /// or a store error.
    pub async fn scan_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyFlag>> {
        let Some(tail) = self.store.tail().await? else {
            return Ok(Vec::new());
        };

        let mut window = Vec::new();
        let mut cursor = 1;
        while cursor <= tail.sequence {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            let batch = self.store.range(cursor, tail.sequence, self.batch_size).await?;
            let Some(last) = batch.last().map(|e| e.sequence) else {
                break;
            };
            window.extend(
                batch
                    .into_iter()
                    .filter(|e| e.timestamp >= since && e.timestamp <= until),
            );
            cursor = last + 1;
        }

        let widest = self.thresholds.widest_window();
        let mut seen = HashSet::new();
        let mut flags = Vec::new();
        let mut lo = 0;
        for (i, trigger) in window.iter().enumerate() {
            while lo < i && window[lo].timestamp < trigger.timestamp - widest {
                lo += 1;
            }
            for flag in evaluate_rules(trigger, &window[lo..=i], &self.thresholds) {
                if seen.insert((flag.kind, flag.subject.clone())) {
                    flags.push(flag);
                }
            }
        }

        debug!(
            entries = window.len(),
            flags = flags.len(),
            "Anomaly window scan complete"
        );
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custos_core::{AuditEvent, ChainTail, GENESIS_HASH};
    use custos_store::MemoryChainStore;
    use uuid::Uuid;

    fn thresholds() -> AnomalyThresholds {
        AnomalyThresholds::builder()
            .brute_force(3, std::time::Duration::from_secs(60))
            .distinct_ips(3, std::time::Duration::from_secs(3600))
            .permission_denials(4, std::time::Duration::from_secs(600))
            .build()
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn chain(events: Vec<(AuditEvent, i64)>) -> (Arc<MemoryChainStore>, Vec<AuditLogEntry>) {
        let store = Arc::new(MemoryChainStore::new());
        let mut tail: Option<ChainTail> = None;
        let mut entries = Vec::new();
        for (i, (event, offset)) in events.into_iter().enumerate() {
            let prev = tail.as_ref().map_or(GENESIS_HASH.to_string(), |t| t.hash.clone());
            let entry = AuditLogEntry::seal(
                event,
                i as u64 + 1,
                Uuid::now_v7(),
                base_time() + Duration::seconds(offset),
                &prev,
            );
            store.append_if_tail(tail.as_ref(), entry.clone()).await.unwrap();
            tail = Some(entry.as_tail());
            entries.push(entry);
        }
        (store, entries)
    }

    fn failure(email: &str, ip: &str) -> AuditEvent {
        AuditEvent::auth_failure(email, ip)
    }

    #[tokio::test]
    async fn test_brute_force_by_ip_fires_on_third() {
        let (store, entries) = chain(vec![
            (failure("a@example.com", "1.2.3.4"), 0),
            (failure("b@example.com", "1.2.3.4"), 20),
            (failure("c@example.com", "1.2.3.4"), 40),
        ])
        .await;
        let detector = AnomalyDetector::new(store, thresholds(), 2);

        assert!(detector.evaluate(&entries[1]).await.unwrap().is_empty());

        let flags = detector.evaluate(&entries[2]).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::BruteForce);
        assert_eq!(flags[0].subject, AnomalySubject::Ip("1.2.3.4".to_string()));
        assert_eq!(flags[0].trigger_sequence, 3);
        assert_eq!(flags[0].sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_brute_force_by_actor() {
        let (store, entries) = chain(vec![
            (failure("eve@example.com", "1.1.1.1"), 0),
            (failure("eve@example.com", "2.2.2.2"), 1),
            (failure("eve@example.com", "3.3.3.3"), 2),
        ])
        .await;
        let detector = AnomalyDetector::new(store, thresholds(), 10);

        let flags = detector.evaluate(&entries[2]).await.unwrap();
        let kinds: Vec<_> = flags.iter().map(|f| (f.kind, f.subject.clone())).collect();
        assert!(kinds.contains(&(
            AnomalyKind::BruteForce,
            AnomalySubject::Actor("eve@example.com".to_string())
        )));
        assert!(kinds.contains(&(
            AnomalyKind::SuspiciousActivity,
            AnomalySubject::Actor("eve@example.com".to_string())
        )));
    }

    #[tokio::test]
    async fn test_failures_outside_window_do_not_count() {
        let (store, entries) = chain(vec![
            (failure("a@example.com", "1.2.3.4"), 0),
            (failure("b@example.com", "1.2.3.4"), 100),
            (failure("c@example.com", "1.2.3.4"), 130),
        ])
        .await;
        let detector = AnomalyDetector::new(store, thresholds(), 10);
        assert!(detector.evaluate(&entries[2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_privilege_probing() {
        let events = (0..4)
            .map(|i| {
                (
                    AuditEvent::permission_denied("mallory", "9.9.9.9", &format!("/admin/{i}"), "GET"),
                    i * 10,
                )
            })
            .collect();
        let (store, entries) = chain(events).await;
        let detector = AnomalyDetector::new(store, thresholds(), 10);

        assert!(detector.evaluate(&entries[2]).await.unwrap().is_empty());
        let flags = detector.evaluate(&entries[3]).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::PrivilegeProbing);
        assert_eq!(flags[0].count, 4);
    }

    #[tokio::test]
    async fn test_scan_window_deduplicates() {
        let mut events: Vec<(AuditEvent, i64)> = (0..5)
            .map(|i| (failure(&format!("u{i}@example.com"), "5.5.5.5"), i))
            .collect();
        events.push((
            AuditEvent::admin_action("root", "10.0.0.1", "/admin/users", "POST"),
            10,
        ));
        let (store, _) = chain(events).await;
        let detector = AnomalyDetector::new(store, thresholds(), 4);

        let flags = detector
            .scan_window(
                base_time(),
                base_time() + Duration::minutes(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].trigger_sequence, 3);

        let flags = detector
            .scan_window(
                base_time() + Duration::seconds(3),
                base_time() + Duration::minutes(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(flags.is_empty());
    }

    #[tokio::test]
    async fn test_scan_window_cancelled() {
        let (store, _) = chain(vec![(failure("a@example.com", "1.2.3.4"), 0)]).await;
        let detector = AnomalyDetector::new(store, thresholds(), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = detector
            .scan_window(base_time(), base_time(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled));
    }
}
