//! Error types for audit chain operations.

use custos_core::ValidationErrors;
use custos_store::StoreError;
use thiserror::Error;

use crate::archiver::ArchiveExclusion;
use crate::verifier::BreakKind;

/// Result type for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors surfaced by the audit chain.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The chain tail moved between read and append.
    #[error("append conflict: tail moved from {expected:?} to {actual:?}")]
    AppendConflict {
        /// Tail sequence the writer observed.
        expected: Option<u64>,
        /// Tail sequence found by the store.
        actual: Option<u64>,
    },

    /// The store could not persist the entry. Not retried.
    #[error("failed to persist audit entry {sequence}: {source}")]
    AppendPersistFailure {
        /// Sequence the entry would have taken.
        sequence: u64,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Every attempt lost the race for the tail.
    #[error("append abandoned after {attempts} conflicting attempts")]
    AppendRetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Verification found a break in the chain.
    #[error("audit chain broken at sequence {sequence} ({kind})")]
    ChainBroken {
        /// First sequence that failed to verify.
        sequence: u64,
        /// How it failed.
        kind: BreakKind,
    },

    /// A partial verification has neither the preceding entry nor a
    /// checkpoint to seed from.
    #[error("no entry or checkpoint at sequence {sequence} to seed verification")]
    InsufficientContext {
        /// The missing seed sequence.
        sequence: u64,
    },

    /// Some requested entries could not be archived.
    #[error("{} entries are not eligible for archival", .excluded.len())]
    ArchiveIneligible {
        /// Excluded entries and why.
        excluded: Vec<ArchiveExclusion>,
    },

    /// No entry with this sequence.
    #[error("audit entry {sequence} not found")]
    EntryNotFound {
        /// The requested sequence.
        sequence: u64,
    },

    /// The event failed ingestion validation.
    #[error("invalid audit event: {0}")]
    InvalidEvent(#[from] ValidationErrors),

    /// A scan was cancelled before finishing.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// Other store failure on a read or update path.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl AuditError {
    /// Returns true for the compare-and-swap conflict, the only error worth
    /// retrying as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AppendConflict { .. })
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for AuditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TailMismatch { expected, actual } => {
                Self::AppendConflict { expected, actual }
            }
            StoreError::NotFound { sequence } => Self::EntryNotFound { sequence },
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::ExclusionReason;

    #[test]
    fn test_store_errors_map_into_taxonomy() {
        let err: AuditError = StoreError::TailMismatch {
            expected: Some(1),
            actual: Some(2),
        }
        .into();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            AuditError::AppendConflict {
                expected: Some(1),
                actual: Some(2)
            }
        ));

        let err: AuditError = StoreError::NotFound { sequence: 9 }.into();
        assert!(matches!(err, AuditError::EntryNotFound { sequence: 9 }));

        let err: AuditError = StoreError::Unavailable("down".to_string()).into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_error_display() {
        let err = AuditError::ChainBroken {
            sequence: 12,
            kind: BreakKind::LinkMismatch,
        };
        assert_eq!(
            err.to_string(),
            "audit chain broken at sequence 12 (link mismatch)"
        );

        let err = AuditError::ArchiveIneligible {
            excluded: vec![
                ArchiveExclusion {
                    sequence: 3,
                    reason: ExclusionReason::Unresolved,
                },
                ArchiveExclusion {
                    sequence: 4,
                    reason: ExclusionReason::TooRecent,
                },
            ],
        };
        assert_eq!(err.to_string(), "2 entries are not eligible for archival");

        let err = AuditError::AppendPersistFailure {
            sequence: 5,
            source: StoreError::Unavailable("disk full".to_string()),
        };
        assert!(err.to_string().contains("entry 5"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
