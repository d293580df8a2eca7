//! In-process chain store.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use custos_core::{AuditLogEntry, ChainTail, Resolution};
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::index::ChainIndex;
use crate::ChainStore;

/// In-memory chain store.
///
/// The compare-and-swap happens under a single write lock, so the check and
/// the insert are atomic. The lock is never held across an `.await`.
///
/// Faults can be injected to exercise retry and failure paths.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    index: RwLock<ChainIndex>,
    injected_conflicts: AtomicU32,
    injected_failures: AtomicU32,
}

impl MemoryChainStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` appends fail with a tail mismatch, as if another
    /// writer had won the race.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` appends fail as if the backend were down.
    pub fn inject_persist_failures(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Rewrites a stored entry in place, bypassing every integrity check.
    ///
    /// Simulates an attacker with direct access to the database.
    pub fn tamper<F>(&self, sequence: u64, f: F) -> bool
    where
        F: FnOnce(&mut AuditLogEntry),
    {
        let mut index = self.index.write();
        let Some(mut entry) = index.get(sequence).cloned() else {
            return false;
        };
        f(&mut entry);
        index.replace(entry);
        true
    }

    /// Hard-deletes an entry, bypassing the append-only contract.
    pub fn purge(&self, sequence: u64) -> Option<AuditLogEntry> {
        self.index.write().remove(sequence)
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn tail(&self) -> StoreResult<Option<ChainTail>> {
        Ok(self.index.read().tail())
    }

    async fn append_if_tail(
        &self,
        expected: Option<&ChainTail>,
        entry: AuditLogEntry,
    ) -> StoreResult<()> {
        if Self::take_fault(&self.injected_failures) {
            return Err(StoreError::Unavailable(
                "injected persist failure".to_string(),
            ));
        }

        let mut index = self.index.write();
        if Self::take_fault(&self.injected_conflicts) {
            return Err(StoreError::TailMismatch {
                expected: expected.map(|t| t.sequence),
                actual: index.tail().map(|t| t.sequence),
            });
        }
        index.check_append(expected, &entry)?;
        index.insert(entry);
        Ok(())
    }

    async fn get(&self, sequence: u64) -> StoreResult<Option<AuditLogEntry>> {
        Ok(self.index.read().get(sequence).cloned())
    }

    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<AuditLogEntry>> {
        Ok(self.index.read().get_by_hash(hash).cloned())
    }

    async fn range(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(self.index.read().range(from, to, limit))
    }

    async fn update_resolution(
        &self,
        sequence: u64,
        resolution: Resolution,
    ) -> StoreResult<AuditLogEntry> {
        let mut index = self.index.write();
        let entry = index.with_resolution(sequence, resolution)?;
        index.replace(entry.clone());
        Ok(entry)
    }

    async fn mark_archived(
        &self,
        sequences: &[u64],
        compact_details: bool,
    ) -> StoreResult<Vec<u64>> {
        let mut index = self.index.write();
        let copies = index.archived_copies(sequences, compact_details);
        let flipped = copies.iter().map(|e| e.sequence).collect();
        for entry in copies {
            index.replace(entry);
        }
        Ok(flipped)
    }

    async fn record_checkpoint(&self, tail: ChainTail) -> StoreResult<()> {
        self.index.write().set_checkpoint(tail);
        Ok(())
    }

    async fn checkpoint(&self, sequence: u64) -> StoreResult<Option<String>> {
        Ok(self.index.read().checkpoint(sequence))
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.index.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use custos_core::{AuditEvent, GENESIS_HASH};
    use uuid::Uuid;

    fn sealed(seq: u64, prev: &str) -> AuditLogEntry {
        let event = AuditEvent::auth_failure("eve@example.com", "1.2.3.4");
        AuditLogEntry::seal(event, seq, Uuid::now_v7(), Utc::now(), prev)
    }

    async fn append_n(store: &MemoryChainStore, n: u64) {
        for _ in 0..n {
            let tail = store.tail().await.unwrap();
            let (seq, prev) = tail
                .as_ref()
                .map_or((1, GENESIS_HASH.to_string()), |t| (t.sequence + 1, t.hash.clone()));
            store
                .append_if_tail(tail.as_ref(), sealed(seq, &prev))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = MemoryChainStore::new();
        assert!(store.tail().await.unwrap().is_none());

        append_n(&store, 3).await;

        let tail = store.tail().await.unwrap().unwrap();
        assert_eq!(tail.sequence, 3);
        assert_eq!(store.count().await.unwrap(), 3);

        let second = store.get(2).await.unwrap().unwrap();
        assert_eq!(store.get_by_hash(&second.hash).await.unwrap().unwrap().sequence, 2);
        let range = store.range(2, 10, 10).await.unwrap();
        assert_eq!(range.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.range(1, 3, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_tail() {
        let store = MemoryChainStore::new();
        append_n(&store, 1).await;

        let err = store
            .append_if_tail(None, sealed(1, GENESIS_HASH))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults_leave_tail_unchanged() {
        let store = MemoryChainStore::new();
        store.inject_persist_failures(1);
        store.inject_conflicts(1);

        let err = store.append_if_tail(None, sealed(1, GENESIS_HASH)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        let err = store.append_if_tail(None, sealed(1, GENESIS_HASH)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.tail().await.unwrap().is_none());

        store.append_if_tail(None, sealed(1, GENESIS_HASH)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolution_and_archive_keep_hash() {
        let store = MemoryChainStore::new();
        append_n(&store, 2).await;
        let before = store.get(1).await.unwrap().unwrap();

        let resolved = store
            .update_resolution(
                1,
                Resolution {
                    resolved: true,
                    resolved_by: Some("ops".to_string()),
                    ..Resolution::default()
                },
            )
            .await
            .unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(resolved.hash, before.hash);

        let flipped = store.mark_archived(&[1, 1, 9], true).await.unwrap();
        assert_eq!(flipped, vec![1]);
        let archived = store.get(1).await.unwrap().unwrap();
        assert!(archived.archived);
        assert!(archived.details.is_none());
        assert_eq!(archived.hash, before.hash);
        assert_eq!(archived.details_digest, before.details_digest);

        assert!(matches!(
            store.update_resolution(42, Resolution::default()).await,
            Err(StoreError::NotFound { sequence: 42 })
        ));
    }

    #[tokio::test]
    async fn test_checkpoints() {
        let store = MemoryChainStore::new();
        assert!(store.checkpoint(5).await.unwrap().is_none());
        store
            .record_checkpoint(ChainTail {
                sequence: 5,
                hash: "ab".repeat(32),
            })
            .await
            .unwrap();
        assert_eq!(store.checkpoint(5).await.unwrap(), Some("ab".repeat(32)));
    }

    #[tokio::test]
    async fn test_tamper_and_purge() {
        let store = MemoryChainStore::new();
        append_n(&store, 2).await;

        assert!(store.tamper(2, |e| e.network.ip = "6.6.6.6".to_string()));
        assert_eq!(store.get(2).await.unwrap().unwrap().network.ip, "6.6.6.6");
        assert!(!store.tamper(7, |_| {}));

        assert!(store.purge(1).is_some());
        assert!(store.get(1).await.unwrap().is_none());
    }
}
