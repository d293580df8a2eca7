//! Chain verification.
//!
//! The verifier walks a sequence range in ascending batches and, for every
//! entry, checks that
//!
//! 1. it sits at the next expected sequence (no gap),
//! 2. its `prev_hash` equals the previous entry's stored `hash`, and
//! 3. recomputing its hash from its own fields and that previous hash gives
//!    back the stored `hash`.
//!
//! The first failure is the break point and the scan stops there.

use std::fmt;
use std::sync::Arc;

use custos_core::GENESIS_HASH;
use custos_store::ChainStore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AuditError, Result};

/// How verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// The recomputed hash differs from the stored one.
    HashMismatch,
    /// `prev_hash` does not point at the previous entry's hash.
    LinkMismatch,
    /// A sequence number inside the range is missing.
    Gap,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HashMismatch => "hash mismatch",
            Self::LinkMismatch => "link mismatch",
            Self::Gap => "gap",
        };
        f.write_str(s)
    }
}

/// Outcome of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True if every entry in the range verified.
    pub valid: bool,
    /// First sequence verified.
    pub from_sequence: u64,
    /// Last sequence in the range (bounded by the tail at call start).
    pub to_sequence: u64,
    /// Entries that passed before the scan stopped.
    pub entries_checked: u64,
    /// First failing sequence.
    pub broken_at_sequence: Option<u64>,
    /// What the failing field should have been.
    pub expected_hash: Option<String>,
    /// What was stored instead.
    pub actual_hash: Option<String>,
    /// How it failed.
    pub break_kind: Option<BreakKind>,
}

impl VerificationReport {
    fn valid(from: u64, to: u64, checked: u64) -> Self {
        Self {
            valid: true,
            from_sequence: from,
            to_sequence: to,
            entries_checked: checked,
            broken_at_sequence: None,
            expected_hash: None,
            actual_hash: None,
            break_kind: None,
        }
    }

    fn broken(
        from: u64,
        to: u64,
        checked: u64,
        at: u64,
        kind: BreakKind,
        expected: Option<String>,
        actual: Option<String>,
    ) -> Self {
        Self {
            valid: false,
            from_sequence: from,
            to_sequence: to,
            entries_checked: checked,
            broken_at_sequence: Some(at),
            expected_hash: expected,
            actual_hash: actual,
            break_kind: Some(kind),
        }
    }

    /// Converts an invalid report into [`AuditError::ChainBroken`].
    ///
    /// # Errors
    ///
    /// Returns `ChainBroken` if the report is not valid.
    pub fn into_result(self) -> Result<Self> {
        match (self.valid, self.broken_at_sequence, self.break_kind) {
            (false, Some(sequence), Some(kind)) => Err(AuditError::ChainBroken { sequence, kind }),
            _ => Ok(self),
        }
    }
}

/// Read-only chain verifier.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    store: Arc<dyn ChainStore>,
    batch_size: usize,
}

impl ChainVerifier {
    /// Creates a verifier reading `batch_size` entries at a time.
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Verifies `from..=to` (defaults: the whole chain).
    ///
    /// The upper bound is clamped to the tail captured when the call starts;
    /// entries appended during the scan are not examined.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InsufficientContext`] if `from > 1` and neither entry
    ///   `from - 1` nor a checkpoint for it exists.
    /// - [`AuditError::Cancelled`] if `cancel` fires between batches.
    pub async fn verify(
        &self,
        from: Option<u64>,
        to: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<VerificationReport> {
        let Some(tail) = self.store.tail().await? else {
            return Ok(VerificationReport::valid(from.unwrap_or(1), 0, 0));
        };

        let from = from.unwrap_or(1).max(1);
        let to = to.map_or(tail.sequence, |t| t.min(tail.sequence));
        if from > to {
            return Ok(VerificationReport::valid(from, to, 0));
        }

        let mut prev_hash = self.seed_hash(from).await?;
        let mut expected_seq = from;
        let mut checked = 0;

        while expected_seq <= to {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }

            let batch = self.store.range(expected_seq, to, self.batch_size).await?;
            if batch.is_empty() {
                warn!(sequence = expected_seq, "Audit chain gap");
                return Ok(VerificationReport::broken(
                    from,
                    to,
                    checked,
                    expected_seq,
                    BreakKind::Gap,
                    None,
                    None,
                ));
            }

            for entry in batch {
                if entry.sequence != expected_seq {
                    warn!(sequence = expected_seq, "Audit chain gap");
                    return Ok(VerificationReport::broken(
                        from,
                        to,
                        checked,
                        expected_seq,
                        BreakKind::Gap,
                        None,
                        None,
                    ));
                }

                if entry.prev_hash != prev_hash {
                    warn!(sequence = entry.sequence, "Audit chain link mismatch");
                    return Ok(VerificationReport::broken(
                        from,
                        to,
                        checked,
                        entry.sequence,
                        BreakKind::LinkMismatch,
                        Some(prev_hash),
                        Some(entry.prev_hash),
                    ));
                }

                let recomputed = entry.recompute_hash(&prev_hash);
                if recomputed != entry.hash {
                    warn!(sequence = entry.sequence, "Audit chain hash mismatch");
                    return Ok(VerificationReport::broken(
                        from,
                        to,
                        checked,
                        entry.sequence,
                        BreakKind::HashMismatch,
                        Some(recomputed),
                        Some(entry.hash),
                    ));
                }

                prev_hash = entry.hash;
                checked += 1;
                expected_seq += 1;
            }
        }

        debug!(from, to, checked, "Audit chain verified");
        Ok(VerificationReport::valid(from, to, checked))
    }

    /// Hash the entry at `from` must link to.
    async fn seed_hash(&self, from: u64) -> Result<String> {
        if from == 1 {
            return Ok(GENESIS_HASH.to_string());
        }
        let seed = from - 1;
        if let Some(entry) = self.store.get(seed).await? {
            return Ok(entry.hash);
        }
        if let Some(hash) = self.store.checkpoint(seed).await? {
            debug!(sequence = seed, "Seeding verification from checkpoint");
            return Ok(hash);
        }
        Err(AuditError::InsufficientContext { sequence: seed })
    }
}
