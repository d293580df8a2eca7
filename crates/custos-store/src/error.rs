//! Chain store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a chain store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The tail moved between read and append (compare-and-swap failed).
    #[error("chain tail moved: expected {expected:?}, found {actual:?}")]
    TailMismatch {
        /// Sequence the writer observed.
        expected: Option<u64>,
        /// Sequence currently at the tail.
        actual: Option<u64>,
    },

    /// The entry does not sit directly after the expected tail.
    #[error("entry {sequence} does not follow tail (next sequence is {next})")]
    SequenceOutOfOrder {
        /// Sequence on the rejected entry.
        sequence: u64,
        /// Sequence the store expected.
        next: u64,
    },

    /// The entry's `prev_hash` does not match the tail hash.
    #[error("entry {sequence} is not linked to the current tail hash")]
    BrokenLink {
        /// Sequence on the rejected entry.
        sequence: u64,
    },

    /// Another entry already carries this hash.
    #[error("hash {hash} already present in the chain")]
    DuplicateHash {
        /// The duplicated hash.
        hash: String,
    },

    /// Entry not found.
    #[error("audit entry {sequence} not found")]
    NotFound {
        /// The missing sequence.
        sequence: u64,
    },

    /// The backend refused or failed the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The journal could not be replayed.
    #[error("journal corrupt at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the append may succeed after re-reading the tail.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TailMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_mismatch_is_retryable() {
        let err = StoreError::TailMismatch {
            expected: Some(4),
            actual: Some(5),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Some(5)"));
    }

    #[test]
    fn test_persist_errors_not_retryable() {
        assert!(!StoreError::Unavailable("disk full".to_string()).is_retryable());
        assert!(!StoreError::BrokenLink { sequence: 3 }.is_retryable());
        assert!(!StoreError::NotFound { sequence: 3 }.is_retryable());
    }
}
