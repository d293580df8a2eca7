//! # Custos Audit
//!
//! The audit chain engine: appends events to a hash-linked chain, verifies
//! it, flags suspicious patterns, archives old entries and answers queries.
//!
//! Most callers only need [`AuditService`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use custos_audit::{AuditConfig, AuditService};
//! use custos_core::AuditEvent;
//! use custos_store::MemoryChainStore;
//!
//! # async fn example() -> custos_audit::Result<()> {
//! let service = AuditService::builder(Arc::new(MemoryChainStore::new()))
//!     .config(AuditConfig::default())
//!     .build()?;
//!
//! let receipt = service
//!     .submit_event(AuditEvent::auth_failure("mallory@example.com", "203.0.113.9"))
//!     .await?;
//!
//! let report = service.verify_chain(None, Some(receipt.sequence)).await?;
//! assert!(report.valid);
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! - [`ChainBuilder`] - Seals events and appends them with compare-and-swap retries
//! - [`ChainVerifier`] - Recomputes hashes and links over a range
//! - [`AnomalyDetector`] - Brute force, suspicious activity and privilege probing rules
//! - [`Archiver`] - Retention: flags resolved entries as archived, never deletes
//! - [`QueryEngine`] - Filtered listing and summaries
//! - [`AlertDispatcher`] - Fans alerts out to [`AlertSink`]s

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alert;
pub mod anomaly;
pub mod archiver;
pub mod builder;
pub mod config;
pub mod error;
pub mod query;
pub mod service;
pub mod verifier;
mod worker;

pub use alert::{
    Alert, AlertDispatcher, AlertDispatcherBuilder, AlertError, AlertSink, InMemoryAlertSink,
    TracingAlertSink,
};
pub use anomaly::{evaluate_rules, AnomalyDetector, AnomalyFlag, AnomalyKind, AnomalySubject};
pub use archiver::{ArchiveExclusion, ArchiveReport, Archiver, ExclusionReason};
pub use builder::{AppendReceipt, ChainBuilder};
pub use config::{AnomalyThresholds, AuditConfig, QueryLimits, RetentionPolicy, RetryPolicy};
pub use error::{AuditError, Result};
pub use query::{AuditSummary, EntryFilter, KeyCount, Page, QueryEngine};
pub use service::{AuditService, AuditServiceBuilder};
pub use verifier::{BreakKind, ChainVerifier, VerificationReport};
