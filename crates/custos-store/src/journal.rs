//! Durable JSON-lines journal store.
//!
//! Every mutation is one line appended to the journal:
//!
//! ```text
//! {"op":"append","entry":{...}}
//! {"op":"update","entry":{...}}          resolution / archival
//! {"op":"checkpoint","sequence":40,"hash":"..."}
//! ```
//!
//! Opening the store replays the journal into an in-memory index. The line
//! is written and synced before the index changes, so a crash mid-append
//! leaves the tail where it was; a torn final line is dropped on replay.
//! A write that fails in-process is truncated away before the error is
//! returned. If the truncation fails too, the writer refuses further records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use custos_core::{AuditLogEntry, ChainTail, Resolution};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::index::ChainIndex;
use crate::ChainStore;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Append { entry: AuditLogEntry },
    Update { entry: AuditLogEntry },
    Checkpoint { sequence: u64, hash: String },
}

/// File-backed chain store.
#[derive(Debug)]
pub struct JournalChainStore {
    path: PathBuf,
    index: RwLock<ChainIndex>,
    /// Serializes journal writes; held only for one record.
    writer: Mutex<JournalWriter>,
}

/// Append handle plus the length of the records known to be on disk.
#[derive(Debug)]
struct JournalWriter {
    file: tokio::fs::File,
    /// Byte length of the committed, newline-terminated records.
    committed: u64,
    poisoned: bool,
    /// Bytes of the next line to write before failing.
    #[cfg(test)]
    tear_next: Option<usize>,
}

impl JournalWriter {
    const fn new(file: tokio::fs::File, committed: u64) -> Self {
        Self {
            file,
            committed,
            poisoned: false,
            #[cfg(test)]
            tear_next: None,
        }
    }

    /// Writes and syncs one record, or leaves the file as it was.
    async fn write_record(&mut self, record: &JournalRecord) -> StoreResult<()> {
        if self.poisoned {
            return Err(StoreError::Unavailable(
                "journal writer disabled after an unrecoverable write failure".to_string(),
            ));
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        match self.write_line(&line).await {
            Ok(()) => {
                self.committed += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                match self.rollback().await {
                    Ok(()) => warn!(error = %e, "Journal write failed; truncated partial record"),
                    Err(rollback) => {
                        error!(
                            error = %e,
                            rollback_error = %rollback,
                            "Journal write failed and could not be rolled back"
                        );
                        self.poisoned = true;
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        if let Some(n) = self.take_tear() {
            self.file.write_all(&line[..n.min(line.len())]).await?;
            self.file.flush().await?;
            return Err(std::io::Error::other("simulated write failure"));
        }
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Cuts the file back to the last committed record. The handle is in
    /// append mode, so the next write lands at the new end.
    async fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.committed).await?;
        self.file.sync_data().await
    }

    #[cfg(test)]
    fn take_tear(&mut self) -> Option<usize> {
        self.tear_next.take()
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self, clippy::needless_pass_by_ref_mut)]
    fn take_tear(&mut self) -> Option<usize> {
        None
    }
}

impl JournalChainStore {
    /// Opens (or creates) the journal at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a record other than
    /// the last one cannot be parsed.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (index, keep, total) = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let (index, keep) = replay(&content)?;
                (index, keep, content.len())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (ChainIndex::default(), 0, 0),
            Err(e) => return Err(e.into()),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if keep < total {
            file.set_len(keep as u64).await?;
        } else if keep > total {
            // Last record was complete but unterminated.
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }

        info!(
            path = %path.display(),
            entries = index.len(),
            tail = ?index.tail().map(|t| t.sequence),
            "Opened audit journal"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(JournalWriter::new(file, keep as u64)),
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuilds the index from journal text.
///
/// Returns the index and the byte length of the well-formed prefix,
/// newline-terminated. A torn final record is excluded from that length.
fn replay(content: &str) -> StoreResult<(ChainIndex, usize)> {
    let mut index = ChainIndex::default();
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let last = lines.len();
    let mut keep = 0;

    for (i, raw) in lines.into_iter().enumerate() {
        let line_no = i + 1;
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            keep += raw.len();
            continue;
        }
        let record: JournalRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) if line_no == last => {
                warn!(line = line_no, error = %e, "Dropping torn final journal record");
                break;
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                })
            }
        };

        match record {
            // Links are not checked here: a tampered journal must still load
            // so the verifier can report where it breaks.
            JournalRecord::Append { entry } => {
                let next = index.tail().map_or(1, |t| t.sequence + 1);
                if entry.sequence != next {
                    return Err(StoreError::Corrupt {
                        line: line_no,
                        reason: format!("expected sequence {next}, found {}", entry.sequence),
                    });
                }
                index.insert(entry);
            }
            JournalRecord::Update { entry } => {
                if index.get(entry.sequence).is_none() {
                    return Err(StoreError::Corrupt {
                        line: line_no,
                        reason: format!("update for unknown sequence {}", entry.sequence),
                    });
                }
                index.replace(entry);
            }
            JournalRecord::Checkpoint { sequence, hash } => {
                index.set_checkpoint(ChainTail { sequence, hash });
            }
        }
        keep += raw.len();
        if !raw.ends_with('\n') {
            keep += 1;
        }
    }

    debug!(entries = index.len(), "Replayed audit journal");
    Ok((index, keep))
}

#[async_trait]
impl ChainStore for JournalChainStore {
    async fn tail(&self) -> StoreResult<Option<ChainTail>> {
        Ok(self.index.read().tail())
    }

    async fn append_if_tail(
        &self,
        expected: Option<&ChainTail>,
        entry: AuditLogEntry,
    ) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;

        // The writer lock makes check, write and insert one atomic step.
        self.index.read().check_append(expected, &entry)?;

        let record = JournalRecord::Append { entry };
        writer.write_record(&record).await?;

        if let JournalRecord::Append { entry } = record {
            self.index.write().insert(entry);
        }
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
        let mut writer = self.writer.lock().await;
        let entry = self.index.read().with_resolution(sequence, resolution)?;

        writer
            .write_record(&JournalRecord::Update { entry: entry.clone() })
            .await?;
        self.index.write().replace(entry.clone());
        Ok(entry)
    }

    async fn mark_archived(
        &self,
        sequences: &[u64],
        compact_details: bool,
    ) -> StoreResult<Vec<u64>> {
        let mut flipped = Vec::with_capacity(sequences.len());

        // One row per lock acquisition so appends interleave freely. The copy
        // is taken under the lock so a concurrent resolution is not undone.
        for &sequence in sequences {
            let mut writer = self.writer.lock().await;
            let copy = self
                .index
                .read()
                .archived_copies(&[sequence], compact_details)
                .pop();
            let Some(entry) = copy else {
                continue;
            };
            writer
                .write_record(&JournalRecord::Update { entry: entry.clone() })
                .await?;
            flipped.push(entry.sequence);
            self.index.write().replace(entry);
        }
        Ok(flipped)
    }

    async fn record_checkpoint(&self, tail: ChainTail) -> StoreResult<()> {
        let mut writer = self.writer.lock().await;
        let record = JournalRecord::Checkpoint {
            sequence: tail.sequence,
            hash: tail.hash.clone(),
        };
        writer.write_record(&record).await?;
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
