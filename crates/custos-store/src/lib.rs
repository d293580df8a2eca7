//! Chain storage for the Custos audit chain.
//!
//! This crate provides:
//! - The [`ChainStore`] trait: an append-only store keyed by `sequence`, with
//!   an atomic "read tail / append-if-tail-unchanged" primitive
//! - [`MemoryChainStore`]: an in-process store (single instance, tests)
//! - [`JournalChainStore`]: a durable JSON-lines journal replayed on open
//!
//! # Concurrency model
//!
//! Writers never lock the chain across a hash computation. They read the
//! tail, seal the next entry, and hand it to [`ChainStore::append_if_tail`]
//! together with the tail they observed. If another writer got there first
//! the store answers [`StoreError::TailMismatch`] and nothing is written;
//! the caller re-reads the tail and tries again.
//!
//! Readers get read-committed semantics: anything whose append returned
//! before the read began is visible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod index;
mod journal;
mod memory;

use async_trait::async_trait;
use custos_core::{AuditLogEntry, ChainTail, Resolution};

pub use error::{StoreError, StoreResult};
pub use journal::JournalChainStore;
pub use memory::MemoryChainStore;

/// Storage backend for the audit chain.
///
/// Implementations must be thread-safe and guarantee that
/// [`append_if_tail`](Self::append_if_tail) inserts the entry and advances the
/// tail as one atomic step.
#[async_trait]
pub trait ChainStore: Send + Sync + std::fmt::Debug {
    /// Returns the current tail, or `None` for an empty chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn tail(&self) -> StoreResult<Option<ChainTail>>;

    /// Appends `entry` only if the tail still equals `expected`.
    ///
    /// The entry must sit at `expected.sequence + 1` (or 1 on an empty chain)
    /// and its `prev_hash` must equal the expected tail hash (or the genesis
    /// constant).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TailMismatch`] if the tail moved, a link or
    /// uniqueness error if the entry does not fit, or a backend error if it
    /// could not be persisted. The tail is unchanged in every error case.
    async fn append_if_tail(
        &self,
        expected: Option<&ChainTail>,
        entry: AuditLogEntry,
    ) -> StoreResult<()>;

    /// Gets an entry by sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, sequence: u64) -> StoreResult<Option<AuditLogEntry>>;

    /// Gets an entry by its hash (secondary unique index).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<AuditLogEntry>>;

    /// Returns up to `limit` entries with `from <= sequence <= to`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn range(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditLogEntry>>;

    /// Replaces the resolution sub-record of an entry. Hashed fields are
    /// never touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entry does not exist.
    async fn update_resolution(
        &self,
        sequence: u64,
        resolution: Resolution,
    ) -> StoreResult<AuditLogEntry>;

    /// Flags the given entries as archived, optionally dropping `details`.
    ///
    /// Only the listed rows are touched. Entries that are missing or already
    /// archived are skipped; the sequences actually flipped are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    async fn mark_archived(&self, sequences: &[u64], compact_details: bool)
        -> StoreResult<Vec<u64>>;

    /// Records a checkpoint hash for `tail.sequence`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be persisted.
    async fn record_checkpoint(&self, tail: ChainTail) -> StoreResult<()>;

    /// Returns the checkpoint hash recorded for `sequence`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn checkpoint(&self, sequence: u64) -> StoreResult<Option<String>>;

    /// Counts stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn count(&self) -> StoreResult<u64>;
}
