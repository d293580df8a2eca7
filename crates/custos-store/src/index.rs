//! In-memory chain index shared by the memory and journal stores.

use std::collections::{BTreeMap, HashMap, HashSet};

use custos_core::{AuditLogEntry, ChainTail, Resolution, GENESIS_HASH};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub(crate) struct ChainIndex {
    entries: BTreeMap<u64, AuditLogEntry>,
    by_hash: HashMap<String, u64>,
    tail: Option<ChainTail>,
    checkpoints: BTreeMap<u64, String>,
}

impl ChainIndex {
    pub(crate) fn tail(&self) -> Option<ChainTail> {
        self.tail.clone()
    }

    /// Checks that `entry` may be appended on top of `expected`.
    pub(crate) fn check_append(
        &self,
        expected: Option<&ChainTail>,
        entry: &AuditLogEntry,
    ) -> StoreResult<()> {
        if self.tail.as_ref() != expected {
            return Err(StoreError::TailMismatch {
                expected: expected.map(|t| t.sequence),
                actual: self.tail.as_ref().map(|t| t.sequence),
            });
        }

        let (next, link) = expected.map_or((1, GENESIS_HASH), |t| (t.sequence + 1, t.hash.as_str()));
        if entry.sequence != next {
            return Err(StoreError::SequenceOutOfOrder {
                sequence: entry.sequence,
                next,
            });
        }
        if entry.prev_hash != link {
            return Err(StoreError::BrokenLink {
                sequence: entry.sequence,
            });
        }
        if self.by_hash.contains_key(&entry.hash) {
            return Err(StoreError::DuplicateHash {
                hash: entry.hash.clone(),
            });
        }
        Ok(())
    }

    /// Inserts an entry and advances the tail. Callers check first.
    pub(crate) fn insert(&mut self, entry: AuditLogEntry) {
        self.by_hash.insert(entry.hash.clone(), entry.sequence);
        if self.tail.as_ref().map_or(true, |t| entry.sequence > t.sequence) {
            self.tail = Some(entry.as_tail());
        }
        self.entries.insert(entry.sequence, entry);
    }

    /// Replaces a stored entry's mutable state, keeping the hash index intact.
    pub(crate) fn replace(&mut self, entry: AuditLogEntry) {
        if let Some(old) = self.entries.get(&entry.sequence) {
            if old.hash != entry.hash {
                self.by_hash.remove(&old.hash);
                self.by_hash.insert(entry.hash.clone(), entry.sequence);
            }
        }
        if self.tail.as_ref().is_some_and(|t| t.sequence == entry.sequence) {
            self.tail = Some(entry.as_tail());
        }
        self.entries.insert(entry.sequence, entry);
    }

    pub(crate) fn remove(&mut self, sequence: u64) -> Option<AuditLogEntry> {
        let removed = self.entries.remove(&sequence)?;
        self.by_hash.remove(&removed.hash);
        Some(removed)
    }

    pub(crate) fn get(&self, sequence: u64) -> Option<&AuditLogEntry> {
        self.entries.get(&sequence)
    }

    pub(crate) fn get_by_hash(&self, hash: &str) -> Option<&AuditLogEntry> {
        self.by_hash.get(hash).and_then(|seq| self.entries.get(seq))
    }

    pub(crate) fn range(&self, from: u64, to: u64, limit: usize) -> Vec<AuditLogEntry> {
        if from > to {
            return Vec::new();
        }
        self.entries
            .range(from..=to)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Returns the entry with its resolution replaced, without storing it.
    pub(crate) fn with_resolution(
        &self,
        sequence: u64,
        resolution: Resolution,
    ) -> StoreResult<AuditLogEntry> {
        let mut entry = self
            .entries
            .get(&sequence)
            .cloned()
            .ok_or(StoreError::NotFound { sequence })?;
        entry.resolution = resolution;
        Ok(entry)
    }

    /// Returns archived copies of the listed entries that are not yet archived.
    pub(crate) fn archived_copies(&self, sequences: &[u64], compact: bool) -> Vec<AuditLogEntry> {
        let mut seen = HashSet::new();
        sequences
            .iter()
            .filter(|seq| seen.insert(**seq))
            .filter_map(|seq| self.entries.get(seq))
            .filter(|e| !e.archived)
            .map(|e| {
                let mut copy = e.clone();
                copy.archived = true;
                if compact {
                    copy.details = None;
                }
                copy
            })
            .collect()
    }

    pub(crate) fn set_checkpoint(&mut self, tail: ChainTail) {
        self.checkpoints.insert(tail.sequence, tail.hash);
    }

    pub(crate) fn checkpoint(&self, sequence: u64) -> Option<String> {
        self.checkpoints.get(&sequence).cloned()
    }

    pub(crate) fn len(&self) -> u64 {
        self.entries.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use custos_core::{AuditEvent, EventType, Severity};
    use uuid::Uuid;

    fn entry(seq: u64, prev: &str) -> AuditLogEntry {
        let event = AuditEvent::new(EventType::AuthSuccess, Severity::Low, "10.0.0.1", "/login", "POST");
        AuditLogEntry::seal(event, seq, Uuid::now_v7(), Utc::now(), prev)
    }

    #[test]
    fn test_first_append_must_use_genesis() {
        let index = ChainIndex::default();
        assert!(index.check_append(None, &entry(1, GENESIS_HASH)).is_ok());
        assert!(matches!(
            index.check_append(None, &entry(2, GENESIS_HASH)),
            Err(StoreError::SequenceOutOfOrder { sequence: 2, next: 1 })
        ));
        assert!(matches!(
            index.check_append(None, &entry(1, &"a".repeat(64))),
            Err(StoreError::BrokenLink { sequence: 1 })
        ));
    }

    #[test]
    fn test_stale_tail_is_rejected() {
        let mut index = ChainIndex::default();
        let first = entry(1, GENESIS_HASH);
        let tail = first.as_tail();
        index.insert(first);

        let second = entry(2, &tail.hash);
        assert!(matches!(
            index.check_append(None, &second),
            Err(StoreError::TailMismatch { expected: None, actual: Some(1) })
        ));
        assert!(index.check_append(Some(&tail), &second).is_ok());
    }

    #[test]
    fn test_archived_copies_skip_already_archived() {
        let mut index = ChainIndex::default();
        let mut first = entry(1, GENESIS_HASH);
        first.archived = true;
        let second = entry(2, &first.hash);
        index.insert(first);
        index.insert(second);

        let copies = index.archived_copies(&[1, 2, 2, 3], true);
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].sequence, 2);
        assert!(copies[0].archived);
        assert!(copies[0].details.is_none());
    }
}
