//! # Custos Test
//!
//! Helpers for testing code built on the Custos audit chain:
//!
//! - [`AuditHarness`] - Service over an in-memory store with a manual clock
//!   and an in-memory alert sink
//! - [`ChainFixture`] - Backdated events, written in code or loaded from YAML/JSON
//! - [`MockActor`] and [`events`] - Actors and canned event sequences
//! - Tamper helpers and assertions for verification tests
//!
//! ## Example
//!
//! ```rust
//! use custos_test::{AuditHarness, ChainFixture, EventFixture, MockActor};
//! use custos_core::AuditEvent;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let harness = AuditHarness::new();
//! let fixture = ChainFixture::new()
//!     .with_event(
//!         EventFixture::new(AuditEvent::admin_action("root", "10.0.0.1", "/admin", "POST"))
//!             .days_ago(40)
//!             .resolved_by("alice"),
//!     )
//!     .with_event(EventFixture::new(
//!         AuditEvent::auth_failure("eve@example.com", "1.2.3.4").with_actor(MockActor::attacker()),
//!     ));
//!
//! fixture.seed(&harness).await.unwrap();
//! let report = harness.service.archive_older_than(30).await.unwrap();
//! assert_eq!(report.archived, vec![1]);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fixtures;
pub mod harness;
pub mod mock_actor;

pub use error::{FixtureError, Result};
pub use fixtures::{ChainFixture, EventFixture};
pub use harness::{assert_broken_at, assert_contiguous, AuditHarness};
pub use mock_actor::{events, MockActor};
