//! # Custos Core
//!
//! Core types for the Custos tamper-evident audit chain.
//!
//! This crate provides the foundational data structures shared by the store,
//! the chain builder and the admin tooling:
//!
//! - [`AuditEvent`] - An event submitted by a collaborator (auth, RBAC, admin handlers)
//! - [`AuditLogEntry`] - A sealed, hash-linked entry as persisted in the chain
//! - [`hash`] - Canonical serialization and the pure [`compute_hash`] function
//! - [`Validate`] - Ingestion-time validation of events
//! - [`Clock`] - Time source abstraction, so retention and anomaly windows are testable
//!
//! ## Hash chain
//!
//! Every entry stores `prev_hash` (the `hash` of the entry at `sequence - 1`, or
//! [`GENESIS_HASH`] for the first entry) and its own `hash`, computed over the
//! canonical bytes of every integrity-relevant field followed by `prev_hash`.
//! The resolution sub-record and the `archived` flag are deliberately outside
//! the hash input.
//!
//! ## Example
//!
//! ```rust
//! use custos_core::{AuditEvent, AuditLogEntry, EventType, Severity, GENESIS_HASH};
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! let event = AuditEvent::new(EventType::AuthFailure, Severity::Medium, "10.0.0.7", "/login", "POST")
//!     .failed("invalid password");
//!
//! let entry = AuditLogEntry::seal(event, 1, Uuid::now_v7(), Utc::now(), GENESIS_HASH);
//! assert_eq!(entry.prev_hash, GENESIS_HASH);
//! assert_eq!(entry.recompute_hash(GENESIS_HASH), entry.hash);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod entry;
pub mod error;
pub mod hash;
pub mod validation;


pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{
    Actor, AuditEvent, AuditLogEntry, ChainTail, EventType, NetworkInfo, RequestInfo, Resolution,
    Severity, Target,
};
pub use error::{Error, Result};
pub use hash::{canonical_json, compute_hash, details_digest, HashedFields, GENESIS_HASH};
pub use validation::{Validate, ValidationError, ValidationErrors};
