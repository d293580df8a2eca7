//! Chain builder: turns submitted events into ordered, hash-linked entries.

use std::sync::Arc;

use custos_core::{AuditEvent, AuditLogEntry, ChainTail, Clock, Validate, GENESIS_HASH};
use custos_store::ChainStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::{AuditError, Result};

/// Where an event landed in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    /// Correlation id assigned at ingestion.
    pub event_id: Uuid,
    /// Sequence of the new entry.
    pub sequence: u64,
    /// Hash of the new entry.
    pub hash: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Serializes appends onto a [`ChainStore`].
///
/// Each attempt reads the tail, seals the event on top of it and asks the
/// store to append only if the tail has not moved. Conflicts are retried with
/// exponential backoff; nothing is held locked while the hash is computed
/// unless the local mutex is enabled.
#[derive(Debug)]
pub struct ChainBuilder {
    store: Arc<dyn ChainStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    local: Option<Mutex<()>>,
}

impl ChainBuilder {
    /// Creates a builder over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ChainStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        serialize_local_appends: bool,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            local: serialize_local_appends.then(|| Mutex::new(())),
        }
    }

    /// Validates and appends an event.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidEvent`] if validation fails; the chain is untouched.
    /// - [`AuditError::AppendRetriesExhausted`] if every attempt conflicted.
    /// - [`AuditError::AppendPersistFailure`] if the store failed the write.
    pub async fn append(&self, event: AuditEvent) -> Result<AppendReceipt> {
        self.append_entry(event).await.map(|(receipt, _)| receipt)
    }

    /// Like [`append`](Self::append), also returning the sealed entry.
    pub(crate) async fn append_entry(
        &self,
        event: AuditEvent,
    ) -> Result<(AppendReceipt, AuditLogEntry)> {
        event.validate()?;
        let event = event.normalized();

        let _local = match &self.local {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let event_id = Uuid::now_v7();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let tail = self.store.tail().await.map_err(|source| {
                error!(error = %source, "Failed to read chain tail");
                AuditError::AppendPersistFailure {
                    sequence: 0,
                    source,
                }
            })?;
            let (sequence, prev_hash) = next_position(tail.as_ref());
            let entry = AuditLogEntry::seal(
                event.clone(),
                sequence,
                event_id,
                self.clock.now(),
                &prev_hash,
            );

            match self.store.append_if_tail(tail.as_ref(), entry.clone()).await {
                Ok(()) => {
                    debug!(
                        sequence,
                        event_type = %entry.event_type,
                        severity = %entry.severity,
                        attempts = attempt,
                        "Audit entry appended"
                    );
                    let receipt = AppendReceipt {
                        event_id,
                        sequence,
                        hash: entry.hash.clone(),
                        attempts: attempt,
                    };
                    return Ok((receipt, entry));
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        error!(
                            event_type = %event.event_type,
                            attempts = attempt,
                            "Append retries exhausted"
                        );
                        return Err(AuditError::AppendRetriesExhausted { attempts: attempt });
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        sequence,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Chain tail moved, retrying append"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    error!(sequence, error = %source, "Failed to persist audit entry");
                    return Err(AuditError::AppendPersistFailure { sequence, source });
                }
            }
        }
    }
}

fn next_position(tail: Option<&ChainTail>) -> (u64, String) {
    tail.map_or_else(
        || (1, GENESIS_HASH.to_string()),
        |t| (t.sequence + 1, t.hash.clone()),
    )
}
