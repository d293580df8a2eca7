//! Retention: archiving old, resolved entries.
//!
//! Archiving flips the `archived` flag and, when compaction is enabled,
//! drops the `details` payload. `sequence`, `hash`, `prev_hash` and
//! `details_digest` are kept, so archived entries keep verifying.
//!
//! The archiver only uses the store's per-row update path; it never takes
//! the append path and never blocks writers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use custos_core::{AuditLogEntry, ChainTail, Clock};
use custos_store::ChainStore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RetentionPolicy;
use crate::error::{AuditError, Result};

/// Why an entry was not archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Old enough, but nobody has resolved it yet.
    Unresolved,
    /// Newer than the retention threshold.
    TooRecent,
    /// Archived by an earlier run.
    AlreadyArchived,
    /// No such sequence.
    NotFound,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unresolved => "unresolved",
            Self::TooRecent => "too recent",
            Self::AlreadyArchived => "already archived",
            Self::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// An entry left out of an archive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveExclusion {
    /// The entry.
    pub sequence: u64,
    /// Why it was left out.
    pub reason: ExclusionReason,
}

/// Outcome of an archive run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReport {
    /// Entries flipped to archived by this run.
    pub archived_count: usize,
    /// Their sequences, ascending.
    pub archived: Vec<u64>,
    /// Entries that were considered but not archived.
    pub excluded: Vec<ArchiveExclusion>,
    /// Entries older than this were considered.
    pub cutoff: DateTime<Utc>,
    /// Checkpoint at the end of the contiguous archived prefix, if any.
    pub checkpoint: Option<ChainTail>,
}

impl ArchiveReport {
    /// Number of exclusions with the given reason.
    #[must_use]
    pub fn excluded_count(&self, reason: ExclusionReason) -> usize {
        self.excluded.iter().filter(|e| e.reason == reason).count()
    }

    /// Fails if any considered entry was excluded.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ArchiveIneligible`] listing the exclusions.
    pub fn ensure_complete(self) -> Result<Self> {
        if self.excluded.is_empty() {
            Ok(self)
        } else {
            Err(AuditError::ArchiveIneligible {
                excluded: self.excluded,
            })
        }
    }
}

/// Archives entries under a [`RetentionPolicy`].
#[derive(Debug, Clone)]
pub struct Archiver {
    store: Arc<dyn ChainStore>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
}

impl Archiver {
    /// Creates an archiver.
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Returns the policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    fn cutoff(&self, older_than_days: u32) -> DateTime<Utc> {
        self.clock.now() - Duration::days(i64::from(older_than_days))
    }

    /// Archives every resolved entry older than `older_than_days`.
    ///
    /// Every entry that is not already archived is considered; the ones left
    /// alone are listed in the report's exclusions as unresolved or too
    /// recent. Entries archived by an earlier run are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] if `cancel` fires between batches,
    /// or a store error.
    pub async fn archive(
        &self,
        older_than_days: u32,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReport> {
        let cutoff = self.cutoff(older_than_days);
        let mut candidates = Vec::new();
        let mut excluded = Vec::new();

        if let Some(tail) = self.store.tail().await? {
            let mut cursor = 1;
            while cursor <= tail.sequence {
                if cancel.is_cancelled() {
                    return Err(AuditError::Cancelled);
                }
                let batch = self
                    .store
                    .range(cursor, tail.sequence, self.policy.batch_size)
                    .await?;
                let Some(last) = batch.last().map(|e| e.sequence) else {
                    break;
                };
                for entry in batch.iter().filter(|e| !e.archived) {
                    match eligibility(entry, cutoff) {
                        None => candidates.push(entry.sequence),
                        Some(reason) => excluded.push(ArchiveExclusion {
                            sequence: entry.sequence,
                            reason,
                        }),
                    }
                }
                cursor = last + 1;
            }
        }

        self.finish(candidates, excluded, cutoff, cancel).await
    }

    /// Archives an explicit set of entries, reporting each one that is not
    /// eligible.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] if `cancel` fires between batches,
    /// or a store error.
    pub async fn archive_sequences(
        &self,
        sequences: &[u64],
        older_than_days: u32,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReport> {
        let cutoff = self.cutoff(older_than_days);
        let mut candidates = Vec::new();
        let mut excluded = Vec::new();

        for &sequence in &sequences.iter().copied().collect::<BTreeSet<_>>() {
            let reason = match self.store.get(sequence).await? {
                None => Some(ExclusionReason::NotFound),
                Some(entry) => eligibility(&entry, cutoff),
            };
            match reason {
                None => candidates.push(sequence),
                Some(reason) => excluded.push(ArchiveExclusion { sequence, reason }),
            }
        }

        self.finish(candidates, excluded, cutoff, cancel).await
    }

    async fn finish(
        &self,
        candidates: Vec<u64>,
        excluded: Vec<ArchiveExclusion>,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReport> {
        let mut archived = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(self.policy.batch_size.max(1)) {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            let flipped = self
                .store
                .mark_archived(chunk, self.policy.compact_details)
                .await?;
            debug!(flipped = flipped.len(), "Archived batch");
            archived.extend(flipped);
        }
        archived.sort_unstable();

        let checkpoint = if archived.is_empty() {
            None
        } else {
            self.record_prefix_checkpoint().await?
        };

        info!(
            archived = archived.len(),
            excluded = excluded.len(),
            unresolved = excluded
                .iter()
                .filter(|e| e.reason == ExclusionReason::Unresolved)
                .count(),
            cutoff = %cutoff,
            checkpoint = ?checkpoint.as_ref().map(|c| c.sequence),
            "Archive run complete"
        );

        Ok(ArchiveReport {
            archived_count: archived.len(),
            archived,
            excluded,
            cutoff,
            checkpoint,
        })
    }

    /// Records a checkpoint for the last entry of the archived run that
    /// starts at sequence 1.
    async fn record_prefix_checkpoint(&self) -> Result<Option<ChainTail>> {
        let Some(tail) = self.store.tail().await? else {
            return Ok(None);
        };

        let mut end: Option<ChainTail> = None;
        let mut cursor = 1;
        'scan: while cursor <= tail.sequence {
            let batch = self
                .store
                .range(cursor, tail.sequence, self.policy.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                if entry.sequence != cursor || !entry.archived {
                    break 'scan;
                }
                end = Some(entry.as_tail());
                cursor += 1;
            }
        }

        let Some(end) = end else {
            return Ok(None);
        };
        if self.store.checkpoint(end.sequence).await?.is_none() {
            self.store.record_checkpoint(end.clone()).await?;
            debug!(sequence = end.sequence, "Recorded archive checkpoint");
        }
        Ok(Some(end))
    }
}

fn eligibility(entry: &AuditLogEntry, cutoff: DateTime<Utc>) -> Option<ExclusionReason> {
    if entry.archived {
        Some(ExclusionReason::AlreadyArchived)
    } else if entry.timestamp >= cutoff {
        Some(ExclusionReason::TooRecent)
    } else if !entry.is_resolved() {
        Some(ExclusionReason::Unresolved)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custos_core::{AuditEvent, ManualClock, Resolution, GENESIS_HASH};
    use custos_store::MemoryChainStore;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-30T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Seeds entries aged `ages` days; `resolved` marks which ones are resolved.
    async fn seeded(ages: &[(i64, bool)]) -> Arc<MemoryChainStore> {
        let store = Arc::new(MemoryChainStore::new());
        for (i, &(age, resolved)) in ages.iter().enumerate() {
            let tail = store.tail().await.unwrap();
            let prev = tail.as_ref().map_or_else(|| GENESIS_HASH.to_string(), |t| t.hash.clone());
            let event = AuditEvent::csp_violation("1.2.3.4", "https://cdn.example");
            let entry = AuditLogEntry::seal(
                event,
                i as u64 + 1,
                Uuid::now_v7(),
                now() - Duration::days(age),
                &prev,
            );
            store.append_if_tail(tail.as_ref(), entry).await.unwrap();
            if resolved {
                store
                    .update_resolution(
                        i as u64 + 1,
                        Resolution {
                            resolved: true,
                            resolved_by: Some("ops".to_string()),
                            ..Resolution::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        }
        store
    }

    fn archiver(store: &Arc<MemoryChainStore>) -> Archiver {
        Archiver::new(
            store.clone(),
            Arc::new(ManualClock::new(now())),
            RetentionPolicy {
                batch_size: 2,
                ..RetentionPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn test_archive_flips_only_old_resolved() {
        let store = seeded(&[(40, true), (35, false), (31, true), (10, true), (5, false)]).await;
        let before = store.get(1).await.unwrap().unwrap();

        let report = archiver(&store)
            .archive(30, &CancellationToken::new())
            .await
            .unwrap();

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
        assert_eq!(report.excluded_count(ExclusionReason::TooRecent), 2);
        assert_eq!(report.excluded_count(ExclusionReason::Unresolved), 1);

        let after = store.get(1).await.unwrap().unwrap();
        assert!(after.archived);
        assert!(after.is_compacted());
        assert_eq!(after.hash, before.hash);
        assert_eq!(after.prev_hash, before.prev_hash);
        assert!(!store.get(4).await.unwrap().unwrap().archived);

        assert_eq!(report.checkpoint.as_ref().map(|c| c.sequence), Some(1));
        assert_eq!(store.checkpoint(1).await.unwrap(), Some(before.hash));

        assert!(matches!(
            report.ensure_complete(),
            Err(AuditError::ArchiveIneligible { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let store = seeded(&[(40, true), (39, true)]).await;
        let archiver = archiver(&store);
        let cancel = CancellationToken::new();

        let first = archiver.archive(30, &cancel).await.unwrap();
        assert_eq!(first.archived_count, 2);
        assert_eq!(first.checkpoint.map(|c| c.sequence), Some(2));

        let second = archiver.archive(30, &cancel).await.unwrap();
        assert_eq!(second.archived_count, 0);
        assert!(second.excluded.is_empty());
        assert!(second.ensure_complete().is_ok());
    }

    #[tokio::test]
    async fn test_archive_sequences_reports_reasons() {
        let store = seeded(&[(40, true), (40, false), (3, true), (50, true)]).await;
        let archiver = archiver(&store);
        let cancel = CancellationToken::new();
        archiver.archive_sequences(&[4], 30, &cancel).await.unwrap();

        let report = archiver
            .archive_sequences(&[1, 2, 3, 4, 99, 1], 30, &cancel)
            .await
            .unwrap();
        assert_eq!(report.archived, vec![1]);
        let reasons: Vec<_> = report.excluded.iter().map(|e| (e.sequence, e.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (2, ExclusionReason::Unresolved),
                (3, ExclusionReason::TooRecent),
                (4, ExclusionReason::AlreadyArchived),
                (99, ExclusionReason::NotFound),
            ]
        );
    }

    #[tokio::test]
    async fn test_compaction_can_be_disabled() {
        let store = seeded(&[(40, true)]).await;
        let archiver = Archiver::new(
            store.clone(),
            Arc::new(ManualClock::new(now())),
            RetentionPolicy {
                compact_details: false,
                ..RetentionPolicy::default()
            },
        );
        archiver.archive(30, &CancellationToken::new()).await.unwrap();
        let entry = store.get(1).await.unwrap().unwrap();
        assert!(entry.archived);
        assert!(!entry.is_compacted());
    }
}
