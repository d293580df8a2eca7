//! Operator alerts.
//!
//! Anomaly flags and chain breaks are pushed to every configured
//! [`AlertSink`] through an [`AlertDispatcher`]. A failing sink is logged and
//! skipped; it never fails the operation that raised the alert.

use std::fmt::Debug;
use std::sync::Arc;

use custos_core::{EventType, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::anomaly::AnomalyFlag;
use crate::verifier::VerificationReport;

/// Something an operator should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alert", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alert {
    /// An anomaly rule fired.
    Anomaly(AnomalyFlag),

    /// Verification found tampering.
    ChainBroken(VerificationReport),

    /// A fail-open event could not be recorded.
    AppendDropped {
        /// Type of the lost event.
        event_type: EventType,
        /// Severity of the lost event.
        severity: Severity,
        /// Why the append failed.
        reason: String,
    },
}

impl Alert {
    /// Returns the alert name, e.g. `BRUTE_FORCE` or `CHAIN_BROKEN`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Anomaly(flag) => flag.kind.as_str(),
            Self::ChainBroken(_) => "CHAIN_BROKEN",
            Self::AppendDropped { .. } => "APPEND_DROPPED",
        }
    }
}

/// Errors a sink may report.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Serialization error
    #[error("Failed to serialize alert: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sink-specific error
    #[error("Sink error: {0}")]
    Sink(String),
}

/// Destination for operator alerts.
pub trait AlertSink: Send + Sync + Debug {
    /// Delivers an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert cannot be delivered.
    fn notify(&self, alert: &Alert) -> Result<(), AlertError>;

    /// Returns the sink name for identification.
    fn name(&self) -> &'static str;
}

/// Fans alerts out to every configured sink.
#[derive(Debug, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    /// Creates a dispatcher with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> AlertDispatcherBuilder {
        AlertDispatcherBuilder::default()
    }

    /// Adds a sink.
    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Sends an alert to every sink.
    pub fn dispatch(&self, alert: &Alert) {
        debug!(alert = alert.name(), sinks = self.sinks.len(), "Dispatching alert");
        for sink in &self.sinks {
            if let Err(e) = sink.notify(alert) {
                error!(sink = sink.name(), error = %e, "Failed to deliver alert");
            }
        }
    }

    /// Returns the number of configured sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

/// Builder for [`AlertDispatcher`].
#[derive(Debug, Default)]
pub struct AlertDispatcherBuilder {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcherBuilder {
    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builds the dispatcher.
    #[must_use]
    pub fn build(self) -> AlertDispatcher {
        AlertDispatcher { sinks: self.sinks }
    }
}

/// Logs alerts through `tracing` at `warn` level.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl TracingAlertSink {
    /// Creates a new tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        let json = serde_json::to_string(alert)?;
        match alert {
            Alert::ChainBroken(report) => warn!(
                alert = alert.name(),
                broken_at = ?report.broken_at_sequence,
                detail = %json,
                "Audit alert"
            ),
            _ => warn!(alert = alert.name(), detail = %json, "Audit alert"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Keeps alerts in memory (for testing).
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryAlertSink {
    /// Creates a new in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all received alerts.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Returns the anomaly flags received.
    #[must_use]
    pub fn anomalies(&self) -> Vec<AnomalyFlag> {
        self.alerts
            .lock()
            .iter()
            .filter_map(|a| match a {
                Alert::Anomaly(flag) => Some(flag.clone()),
                _ => None,
            })
            .collect()
    }

    /// Counts alerts with the given name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.alerts.lock().iter().filter(|a| a.name() == name).count()
    }

    /// Returns the number of alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Returns true if no alerts have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }

    /// Clears all alerts.
    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertSink for InMemoryAlertSink {
    fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyKind, AnomalySubject};
    use chrono::Utc;

    #[derive(Debug)]
    struct FailingSink;

    impl AlertSink for FailingSink {
        fn notify(&self, _alert: &Alert) -> Result<(), AlertError> {
            Err(AlertError::Sink("pager offline".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn brute_force() -> Alert {
        Alert::Anomaly(AnomalyFlag {
            kind: AnomalyKind::BruteForce,
            subject: AnomalySubject::Ip("1.2.3.4".to_string()),
            trigger_sequence: 3,
            count: 3,
            window_start: Utc::now(),
            window_end: Utc::now(),
            sequences: vec![1, 2, 3],
        })
    }

    #[test]
    fn test_alert_names() {
        assert_eq!(brute_force().name(), "BRUTE_FORCE");
        let dropped = Alert::AppendDropped {
            event_type: EventType::CspViolation,
            severity: Severity::Low,
            reason: "store down".to_string(),
        };
        assert_eq!(dropped.name(), "APPEND_DROPPED");
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let memory = Arc::new(InMemoryAlertSink::new());
        let dispatcher = AlertDispatcher::builder()
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(TracingAlertSink::new()))
            .with_sink(memory.clone())
            .build();
        assert_eq!(dispatcher.sink_count(), 3);

        dispatcher.dispatch(&brute_force());
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.count("BRUTE_FORCE"), 1);
        assert_eq!(memory.anomalies()[0].trigger_sequence, 3);

        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_alert_serializes_with_tag() {
        let json = serde_json::to_value(brute_force()).unwrap();
        assert_eq!(json["alert"], "ANOMALY");
        assert_eq!(json["kind"], "BRUTE_FORCE");
    }
}
