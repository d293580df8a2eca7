//! Background anomaly worker.
//!
//! Consumes freshly appended entries from a bounded mpsc channel and runs
//! the anomaly rules on them. Exits when the channel closes.

use std::sync::Arc;

use custos_core::AuditLogEntry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::alert::{Alert, AlertDispatcher};
use crate::anomaly::AnomalyDetector;

pub(crate) enum WorkItem {
    Evaluate(AuditLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Runs the anomaly rules off the append path.
pub(crate) struct AnomalyWorker {
    detector: AnomalyDetector,
    alerts: Arc<AlertDispatcher>,
}

impl AnomalyWorker {
    pub(crate) const fn new(detector: AnomalyDetector, alerts: Arc<AlertDispatcher>) -> Self {
        Self { detector, alerts }
    }

    /// Spawns the worker and returns the handle feeding it.
    pub(crate) fn spawn(self, capacity: usize) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let join = tokio::spawn(self.run(rx));
        WorkerHandle { tx, join }
    }

    async fn run(self, mut rx: mpsc::Receiver<WorkItem>) {
        info!("Anomaly worker started");

        while let Some(item) = rx.recv().await {
            match item {
                WorkItem::Evaluate(entry) => {
                    evaluate_and_alert(&self.detector, &self.alerts, &entry).await;
                }
                WorkItem::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        info!("Anomaly channel closed, worker stopping");
    }
}

/// Evaluates one entry and dispatches any flags. Failures are logged.
pub(crate) async fn evaluate_and_alert(
    detector: &AnomalyDetector,
    alerts: &AlertDispatcher,
    entry: &AuditLogEntry,
) {
    match detector.evaluate(entry).await {
        Ok(flags) => {
            for flag in flags {
                alerts.dispatch(&Alert::Anomaly(flag));
            }
        }
        Err(e) => {
            error!(sequence = entry.sequence, error = %e, "Anomaly evaluation failed");
        }
    }
}

/// Sending side of the worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    tx: mpsc::Sender<WorkItem>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queues an entry, handing it back if the queue is full or closed.
    pub(crate) fn try_submit(&self, entry: AuditLogEntry) -> Option<AuditLogEntry> {
        match self.tx.try_send(WorkItem::Evaluate(entry)) {
            Ok(()) => None,
            Err(e) => match e.into_inner() {
                WorkItem::Evaluate(entry) => Some(entry),
                WorkItem::Flush(_) => None,
            },
        }
    }

    /// Waits until everything queued before this call has been evaluated.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WorkItem::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Closes the queue and waits for the worker to drain it.
    pub(crate) async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.join.await {
            error!(error = %e, "Anomaly worker panicked");
        } else {
            debug!("Anomaly worker stopped");
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluate(entry) => f.debug_tuple("Evaluate").field(&entry.sequence).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}
