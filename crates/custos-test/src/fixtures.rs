//! Chain fixtures.
//!
//! A fixture is an ordered list of events, each with an age relative to the
//! moment of seeding and an optional resolver. Fixtures can be written in
//! code or loaded from YAML/JSON files.
//!
//! ```yaml
//! name: retention
//! events:
//!   - name: old-resolved
//!     age_days: 45
//!     resolved_by: alice
//!     event:
//!       event_type: ADMIN_ACTION
//!       severity: HIGH
//!       network: { ip: 10.0.0.1, user_agent: "" }
//!       request: { path: /admin, method: POST }
//!       success: true
//! ```

use std::fs;
use std::path::Path;

use chrono::Duration;
use custos_audit::AppendReceipt;
use custos_core::AuditEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FixtureError, Result};
use crate::harness::AuditHarness;

/// One event of a [`ChainFixture`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFixture {
    /// Optional label, used in error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// How many days before seeding the event happened.
    #[serde(default)]
    pub age_days: i64,

    /// Additional seconds on top of `age_days`.
    #[serde(default)]
    pub age_secs: i64,

    /// Resolve the entry right after appending it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,

    /// The event itself.
    pub event: AuditEvent,
}

impl EventFixture {
    /// Creates a fixture for an event that happens at seeding time.
    #[must_use]
    pub const fn new(event: AuditEvent) -> Self {
        Self {
            name: None,
            age_days: 0,
            age_secs: 0,
            resolved_by: None,
            event,
        }
    }

    /// Labels the fixture.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Backdates the event by `days`.
    #[must_use]
    pub const fn days_ago(mut self, days: i64) -> Self {
        self.age_days = days;
        self
    }

    /// Backdates the event by `secs`, on top of any days.
    #[must_use]
    pub const fn secs_ago(mut self, secs: i64) -> Self {
        self.age_secs = secs;
        self
    }

    /// Marks the event resolved by `operator`.
    #[must_use]
    pub fn resolved_by(mut self, operator: impl Into<String>) -> Self {
        self.resolved_by = Some(operator.into());
        self
    }

    /// Total age.
    #[must_use]
    pub fn age(&self) -> Duration {
        Duration::days(self.age_days) + Duration::seconds(self.age_secs)
    }
}

/// An ordered list of events to seed into a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainFixture {
    /// Name of the fixture set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Events, in append order.
    #[serde(default)]
    pub events: Vec<EventFixture>,
}

impl ChainFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends an event.
    #[must_use]
    pub fn with_event(mut self, event: EventFixture) -> Self {
        self.events.push(event);
        self
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the fixture has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Parses a YAML fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses a JSON fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a fixture file, picking the format from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            _ => Err(FixtureError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Appends every event through the harness service, backdating each
    /// with the harness clock, then puts the clock back.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Seed`] naming the first event that failed.
    pub async fn seed(&self, harness: &AuditHarness) -> Result<Vec<AppendReceipt>> {
        let now = harness.now();
        let mut receipts = Vec::with_capacity(self.events.len());

        for (i, fixture) in self.events.iter().enumerate() {
            let label = || fixture.name.clone().unwrap_or_else(|| format!("#{i}"));
            harness.clock.set(now - fixture.age());

            let receipt = harness
                .service
                .submit_event(fixture.event.clone())
                .await
                .map_err(|source| FixtureError::Seed {
                    fixture: label(),
                    source,
                })?;

            if let Some(operator) = &fixture.resolved_by {
                harness
                    .service
                    .resolve_entry(receipt.sequence, operator, None)
                    .await
                    .map_err(|source| FixtureError::Seed {
                        fixture: label(),
                        source,
                    })?;
            }
            receipts.push(receipt);
        }

        harness.clock.set(now);
        debug!(fixture = ?self.name, seeded = receipts.len(), "Seeded chain fixture");
        Ok(receipts)
    }
}
