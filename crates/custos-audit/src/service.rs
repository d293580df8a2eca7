//! The audit service: ingestion, admin and query entry points in one place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custos_core::{AuditEvent, AuditLogEntry, Clock, Resolution, SystemClock};
use custos_store::ChainStore;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertDispatcher, AlertSink, TracingAlertSink};
use crate::anomaly::{AnomalyDetector, AnomalyFlag};
use crate::archiver::{ArchiveReport, Archiver};
use crate::builder::{AppendReceipt, ChainBuilder};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::query::{AuditSummary, EntryFilter, Page, QueryEngine};
use crate::verifier::{ChainVerifier, VerificationReport};
use crate::worker::{evaluate_and_alert, AnomalyWorker, WorkerHandle};

/// Tamper-evident audit service.
///
/// Collaborators submit events through [`submit_event`](Self::submit_event)
/// or [`record`](Self::record); operators verify, archive, resolve and query
/// through the remaining methods. All scans run against a tail captured at
/// call start; the ones in flight can be cancelled in bulk with
/// [`cancel_scans`](Self::cancel_scans).
#[derive(Debug)]
pub struct AuditService {
    config: AuditConfig,
    store: Arc<dyn ChainStore>,
    clock: Arc<dyn Clock>,
    builder: ChainBuilder,
    verifier: ChainVerifier,
    detector: AnomalyDetector,
    archiver: Archiver,
    query: QueryEngine,
    alerts: Arc<AlertDispatcher>,
    worker: Option<WorkerHandle>,
    /// Parent of every running scan's token; replaced on each cancel.
    scans: Mutex<CancellationToken>,
}

impl AuditService {
    /// Creates a builder over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn ChainStore>) -> AuditServiceBuilder {
        AuditServiceBuilder::new(store)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Returns the verifier, for scans with a caller-owned cancellation token.
    #[must_use]
    pub const fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    /// Returns the query engine, for scans with a caller-owned cancellation token.
    #[must_use]
    pub const fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Returns the anomaly detector.
    #[must_use]
    pub const fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Returns the archiver.
    #[must_use]
    pub const fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Validates and appends an event, returning where it landed.
    ///
    /// Anomaly rules run before this returns for events at or above the
    /// configured synchronous severity, and in the background otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidEvent`], [`AuditError::AppendPersistFailure`]
    /// or [`AuditError::AppendRetriesExhausted`]. Nothing is silently dropped.
    pub async fn submit_event(&self, event: AuditEvent) -> Result<AppendReceipt> {
        let (receipt, entry) = self.builder.append_entry(event).await?;
        self.after_append(entry).await;
        Ok(receipt)
    }

    /// Appends an event under the severity-driven failure policy.
    ///
    /// HIGH and CRITICAL events fail closed: the error is returned and the
    /// caller must refuse the guarded action. LOW and MEDIUM events fail
    /// open: the failure is logged, an `APPEND_DROPPED` alert is raised and
    /// `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the append error for fail-closed severities.
    pub async fn record(&self, event: AuditEvent) -> Result<Option<AppendReceipt>> {
        let event_type = event.event_type;
        let severity = event.severity;

        match self.submit_event(event).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) if severity.is_fail_closed() => {
                error!(%event_type, %severity, error = %e, "Audit append failed, failing closed");
                Err(e)
            }
            Err(e) => {
                warn!(%event_type, %severity, error = %e, "Audit append failed, failing open");
                self.alerts.dispatch(&Alert::AppendDropped {
                    event_type,
                    severity,
                    reason: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    async fn after_append(&self, entry: AuditLogEntry) {
        let sync = entry.severity >= self.config.anomaly.sync_severity;
        let entry = match (&self.worker, sync) {
            (Some(worker), false) => match worker.try_submit(entry) {
                None => return,
                Some(entry) => {
                    debug!(sequence = entry.sequence, "Anomaly queue full, evaluating inline");
                    entry
                }
            },
            _ => entry,
        };
        evaluate_and_alert(&self.detector, &self.alerts, &entry).await;
    }

    /// Waits until every entry queued for background anomaly evaluation
    /// has been processed.
    pub async fn flush_anomalies(&self) {
        if let Some(worker) = &self.worker {
            worker.flush().await;
        }
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// Verifies `from..=to` (defaults: the whole chain).
    ///
    /// An invalid report raises a `CHAIN_BROKEN` alert.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InsufficientContext`], [`AuditError::Cancelled`]
    /// or a store error. A broken chain is a valid report, not an error.
    pub async fn verify_chain(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<VerificationReport> {
        let report = self
            .verifier
            .verify(from, to, &self.scan_token())
            .await?;
        if !report.valid {
            error!(
                broken_at = ?report.broken_at_sequence,
                kind = ?report.break_kind,
                "Audit chain verification failed"
            );
            self.alerts.dispatch(&Alert::ChainBroken(report.clone()));
        }
        Ok(report)
    }

    /// Like [`verify_chain`](Self::verify_chain), but a broken chain is an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ChainBroken`] on the first break.
    pub async fn verify_chain_strict(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<VerificationReport> {
        self.verify_chain(from, to).await?.into_result()
    }

    /// Archives resolved entries older than `days`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] or a store error.
    pub async fn archive_older_than(&self, days: u32) -> Result<ArchiveReport> {
        self.archiver
            .archive(days, &self.scan_token())
            .await
    }

    /// Archives the given entries if they are resolved and older than `days`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] or a store error. Ineligible entries
    /// are reported, not errors; see [`ArchiveReport::ensure_complete`].
    pub async fn archive_sequences(&self, sequences: &[u64], days: u32) -> Result<ArchiveReport> {
        self.archiver
            .archive_sequences(sequences, days, &self.scan_token())
            .await
    }

    /// Marks an entry resolved. Hashed fields are never touched.
    ///
    /// Resolving again with the same resolver and notes is a no-op that
    /// keeps the original `resolved_at`; anything different overwrites the
    /// resolution and refreshes `resolved_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::EntryNotFound`] if there is no such entry.
    pub async fn resolve_entry(
        &self,
        sequence: u64,
        resolved_by: &str,
        notes: Option<String>,
    ) -> Result<AuditLogEntry> {
        let entry = self
            .store
            .get(sequence)
            .await?
            .ok_or(AuditError::EntryNotFound { sequence })?;

        let current = &entry.resolution;
        if current.resolved
            && current.resolved_by.as_deref() == Some(resolved_by)
            && current.notes == notes
        {
            debug!(sequence, "Entry already resolved with the same details");
            return Ok(entry);
        }

        let resolution = Resolution {
            resolved: true,
            resolved_at: Some(self.clock.now()),
            resolved_by: Some(resolved_by.to_string()),
            notes,
        };
        let updated = self.store.update_resolution(sequence, resolution).await?;
        info!(sequence, resolved_by, "Audit entry resolved");
        Ok(updated)
    }

    /// Cancels every scan in flight. Scans started afterwards run normally.
    pub fn cancel_scans(&self) {
        let cancelled = std::mem::take(&mut *self.scans.lock());
        cancelled.cancel();
        info!("Cancelled in-flight scans");
    }

    fn scan_token(&self) -> CancellationToken {
        self.scans.lock().child_token()
    }

    /// Stops the background worker after it drains its queue.
    pub async fn shutdown(self) {
        if let Some(worker) = self.worker {
            worker.shutdown().await;
        }
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Fetches one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::EntryNotFound`] if there is no such entry.
    pub async fn get_entry(&self, sequence: u64) -> Result<AuditLogEntry> {
        self.store
            .get(sequence)
            .await?
            .ok_or(AuditError::EntryNotFound { sequence })
    }

    /// Lists entries matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] or a store error.
    pub async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<Page> {
        self.query
            .list_entries(filter, page, page_size, &self.scan_token())
            .await
    }

    /// Aggregates entries within `since..=until`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] or a store error.
    pub async fn summary(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        top_n: Option<usize>,
    ) -> Result<AuditSummary> {
        self.query
            .summary(since, until, top_n, &self.scan_token())
            .await
    }

    /// Batch anomaly scan over `since..=until`. Flags are returned, not alerted.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] or a store error.
    pub async fn scan_anomalies(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AnomalyFlag>> {
        self.detector
            .scan_window(since, until, &self.scan_token())
            .await
    }
}

/// Builder for [`AuditService`].
#[derive(Debug)]
pub struct AuditServiceBuilder {
    store: Arc<dyn ChainStore>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<AuditConfig>,
    sinks: Vec<Arc<dyn AlertSink>>,
    background: bool,
}

impl AuditServiceBuilder {
    /// Creates a builder over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self {
            store,
            clock: None,
            config: None,
            sinks: Vec::new(),
            background: true,
        }
    }

    /// Sets the clock (default: system time).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: AuditConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds an alert sink. Without any, alerts go to a tracing sink.
    #[must_use]
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Enables or disables the background anomaly worker. When disabled
    /// every append is evaluated inline.
    #[must_use]
    pub const fn background_anomalies(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Validates the configuration and builds the service.
    ///
    /// The background worker is only spawned inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<AuditService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self.store;

        let mut dispatcher = AlertDispatcher::new();
        if self.sinks.is_empty() {
            dispatcher.add_sink(Arc::new(TracingAlertSink::new()));
        }
        for sink in self.sinks {
            dispatcher.add_sink(sink);
        }
        let alerts = Arc::new(dispatcher);

        let batch = config.query.scan_batch_size;
        let detector = AnomalyDetector::new(store.clone(), config.anomaly.clone(), batch);

        let worker = (self.background && tokio::runtime::Handle::try_current().is_ok()).then(|| {
            AnomalyWorker::new(detector.clone(), alerts.clone())
                .spawn(config.anomaly.queue_capacity)
        });

        info!(
            serialize_local_appends = config.serialize_local_appends,
            sync_severity = %config.anomaly.sync_severity,
            background = worker.is_some(),
            sinks = alerts.sink_count(),
            "Audit service ready"
        );

        Ok(AuditService {
            builder: ChainBuilder::new(
                store.clone(),
                clock.clone(),
                config.retry.clone(),
                config.serialize_local_appends,
            ),
            verifier: ChainVerifier::new(store.clone(), batch),
            archiver: Archiver::new(store.clone(), clock.clone(), config.retention.clone()),
            query: QueryEngine::new(store.clone(), config.query.clone()),
            detector,
            alerts,
            worker,
            scans: Mutex::new(CancellationToken::new()),
            store,
            clock,
            config,
        })
    }
}
