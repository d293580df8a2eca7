//! Audit event and chain entry definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::hash::{compute_hash, details_digest, HashedFields};

/// Closed set of security-relevant event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A login or token check failed.
    AuthFailure,
    /// A login succeeded.
    AuthSuccess,
    /// RBAC middleware rejected a request.
    PermissionDenied,
    /// An administrator performed a privileged action.
    AdminAction,
    /// The browser reported a Content-Security-Policy violation.
    CspViolation,
    /// A client exceeded a rate limit.
    RateLimitExceeded,
    /// A collaborator flagged activity as suspicious.
    SuspiciousActivity,
    /// User data was exported.
    DataExport,
    /// Security-relevant configuration was changed.
    ConfigChange,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::AuthFailure,
        Self::AuthSuccess,
        Self::PermissionDenied,
        Self::AdminAction,
        Self::CspViolation,
        Self::RateLimitExceeded,
        Self::SuspiciousActivity,
        Self::DataExport,
        Self::ConfigChange,
    ];

    /// Returns the stable wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILURE",
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AdminAction => "ADMIN_ACTION",
            Self::CspViolation => "CSP_VIOLATION",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::DataExport => "DATA_EXPORT",
            Self::ConfigChange => "CONFIG_CHANGE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| Error::UnknownEventType {
                value: s.to_string(),
            })
    }
}

/// Severity of an audit event. Ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Routine, informational.
    #[default]
    Low,
    /// Worth reviewing.
    Medium,
    /// Needs attention.
    High,
    /// Requires immediate operator attention.
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the stable wire name of the severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Whether a failed audit write for this severity must block the
    /// triggering action.
    #[must_use]
    pub const fn is_fail_closed(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == normalized)
            .ok_or_else(|| Error::UnknownSeverity {
                value: s.to_string(),
            })
    }
}

/// The user on whose behalf the audited request was made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Application user ID.
    pub user_id: Option<String>,
    /// Email address (known even when login failed).
    pub email: Option<String>,
    /// Role at the time of the event.
    pub role: Option<String>,
}

impl Actor {
    /// Creates an actor with a user ID.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Creates an actor known only by email, e.g. a failed login.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Identity used to group events per actor: the user ID, falling back to
    /// the email.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.email.as_deref())
    }
}

/// Network origin of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Client IP address.
    pub ip: String,
    /// Client user agent.
    pub user_agent: String,
}

/// The HTTP request that triggered the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request path.
    pub path: String,
    /// HTTP method.
    pub method: String,
}

/// The resource the action was aimed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Resource kind, e.g. `post` or `user`.
    pub target_type: Option<String>,
    /// Resource identifier.
    pub target_id: Option<String>,
}

impl Target {
    /// Creates a target.
    #[must_use]
    pub fn new(target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            target_type: Some(target_type.into()),
            target_id: Some(target_id.into()),
        }
    }
}

/// An event as submitted by a collaborator, before it is sealed into the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Type of event.
    pub event_type: EventType,

    /// Severity of event.
    pub severity: Severity,

    /// Acting user, if known.
    pub actor: Option<Actor>,

    /// Network origin.
    pub network: NetworkInfo,

    /// Triggering request.
    pub request: RequestInfo,

    /// Affected resource, if any.
    pub target: Option<Target>,

    /// Opaque structured payload.
    #[serde(default)]
    pub details: serde_json::Value,

    /// Whether the audited action succeeded.
    pub success: bool,

    /// Failure description when `success` is false.
    pub error_message: Option<String>,
}

impl AuditEvent {
    /// Creates a successful event with the required network/request fields.
    #[must_use]
    pub fn new(
        event_type: EventType,
        severity: Severity,
        ip: &str,
        path: &str,
        method: &str,
    ) -> Self {
        Self {
            event_type,
            severity,
            actor: None,
            network: NetworkInfo {
                ip: ip.to_string(),
                user_agent: String::new(),
            },
            request: RequestInfo {
                path: path.to_string(),
                method: method.to_string(),
            },
            target: None,
            details: serde_json::Value::Null,
            success: true,
            error_message: None,
        }
    }

    /// Creates a failed login event.
    #[must_use]
    pub fn auth_failure(email: &str, ip: &str) -> Self {
        Self::new(EventType::AuthFailure, Severity::Medium, ip, "/api/auth/login", "POST")
            .with_actor(Actor::email(email))
            .failed("invalid credentials")
    }

    /// Creates a permission denied event.
    #[must_use]
    pub fn permission_denied(user_id: &str, ip: &str, path: &str, method: &str) -> Self {
        Self::new(EventType::PermissionDenied, Severity::High, ip, path, method)
            .with_actor(Actor::user(user_id))
            .failed("insufficient permissions")
    }

    /// Creates an admin action event.
    #[must_use]
    pub fn admin_action(admin_id: &str, ip: &str, path: &str, method: &str) -> Self {
        Self::new(EventType::AdminAction, Severity::High, ip, path, method)
            .with_actor(Actor::user(admin_id).with_role("admin"))
    }

    /// Creates a CSP violation report event.
    #[must_use]
    pub fn csp_violation(ip: &str, blocked_uri: &str) -> Self {
        Self::new(EventType::CspViolation, Severity::Low, ip, "/api/csp-report", "POST")
            .with_details(serde_json::json!({ "blockedUri": blocked_uri }))
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.network.user_agent = user_agent.to_string();
        self
    }

    /// Sets the target resource.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the structured details payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Overrides the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Marks the event as a failed action.
    #[must_use]
    pub fn failed(mut self, error_message: &str) -> Self {
        self.success = false;
        self.error_message = Some(error_message.to_string());
        self
    }
}

/// Resolution sub-record. Mutable, and never part of the hash input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Whether an operator has resolved the entry.
    pub resolved: bool,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    pub resolved_by: Option<String>,
    /// Operator notes.
    pub notes: Option<String>,
}

/// Position of the last entry of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainTail {
    /// Sequence of the last entry.
    pub sequence: u64,
    /// Hash of the last entry.
    pub hash: String,
}

/// A sealed entry of the audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Strictly monotonic, gap-free position in the chain, starting at 1.
    pub sequence: u64,

    /// Correlation identifier handed back to the collaborator.
    pub event_id: Uuid,

    /// Type of event.
    pub event_type: EventType,

    /// Severity of event.
    pub severity: Severity,

    /// Acting user, if known.
    pub actor: Option<Actor>,

    /// Network origin.
    pub network: NetworkInfo,

    /// Triggering request.
    pub request: RequestInfo,

    /// Affected resource, if any.
    pub target: Option<Target>,

    /// Structured payload. `None` once compacted by the archiver; the key is
    /// then omitted, so a stored `null` stays a present payload.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_details"
    )]
    pub details: Option<serde_json::Value>,

    /// SHA-256 of the canonical details, retained after compaction.
    pub details_digest: String,

    /// Informational timestamp; never used for ordering.
    pub timestamp: DateTime<Utc>,

    /// Whether the audited action succeeded.
    pub success: bool,

    /// Failure description.
    pub error_message: Option<String>,

    /// Hash of this entry.
    pub hash: String,

    /// Hash of the entry at `sequence - 1`.
    pub prev_hash: String,

    /// Operator resolution.
    #[serde(default)]
    pub resolution: Resolution,

    /// Set by the archiver only.
    #[serde(default)]
    pub archived: bool,
}

impl AuditLogEntry {
    /// Seals an event at `sequence`, linking it to `prev_hash`.
    #[must_use]
    pub fn seal(
        event: AuditEvent,
        sequence: u64,
        event_id: Uuid,
        timestamp: DateTime<Utc>,
        prev_hash: &str,
    ) -> Self {
        let digest = details_digest(&event.details);
        let mut entry = Self {
            sequence,
            event_id,
            event_type: event.event_type,
            severity: event.severity,
            actor: event.actor,
            network: event.network,
            request: event.request,
            target: event.target,
            details: Some(event.details),
            details_digest: digest,
            timestamp,
            success: event.success,
            error_message: event.error_message,
            hash: String::new(),
            prev_hash: prev_hash.to_string(),
            resolution: Resolution::default(),
            archived: false,
        };
        entry.hash = compute_hash(&entry.hashed_fields(), prev_hash);
        entry
    }

    /// Borrows the fields covered by the hash.
    ///
    /// While `details` is present its digest is recomputed, so tampering with
    /// the payload is caught even if the stored digest was left alone.
    #[must_use]
    pub fn hashed_fields(&self) -> HashedFields<'_> {
        let digest = self
            .details
            .as_ref()
            .map_or_else(|| self.details_digest.clone(), details_digest);

        HashedFields {
            sequence: self.sequence,
            event_id: &self.event_id,
            event_type: self.event_type,
            severity: self.severity,
            actor: self.actor.as_ref(),
            network: &self.network,
            request: &self.request,
            target: self.target.as_ref(),
            details_digest: digest,
            timestamp_ms: self.timestamp.timestamp_millis(),
            success: self.success,
            error_message: self.error_message.as_deref(),
        }
    }

    /// Recomputes this entry's hash from its stored fields and the given
    /// predecessor hash.
    #[must_use]
    pub fn recompute_hash(&self, prev_hash: &str) -> String {
        compute_hash(&self.hashed_fields(), prev_hash)
    }

    /// Returns true if the details payload was dropped by the archiver.
    #[must_use]
    pub const fn is_compacted(&self) -> bool {
        self.details.is_none()
    }

    /// Returns the actor grouping key, if any.
    #[must_use]
    pub fn actor_key(&self) -> Option<&str> {
        self.actor.as_ref().and_then(Actor::key)
    }

    /// Returns the actor's user ID, if any.
    #[must_use]
    pub fn actor_user_id(&self) -> Option<&str> {
        self.actor.as_ref().and_then(|a| a.user_id.as_deref())
    }

    /// Returns true once an operator has resolved the entry.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolution.resolved
    }

    /// Returns this entry's position as a chain tail.
    #[must_use]
    pub fn as_tail(&self) -> ChainTail {
        ChainTail {
            sequence: self.sequence,
            hash: self.hash.clone(),
        }
    }
}

/// Reads any present `details` value, `null` included, as `Some`.
fn present_details<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GENESIS_HASH;

    fn sealed(event: AuditEvent) -> AuditLogEntry {
        AuditLogEntry::seal(event, 1, Uuid::now_v7(), Utc::now(), GENESIS_HASH)
    }

    #[test]
    fn test_event_type_round_trips_through_str() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
        }
        assert_eq!(
            "auth-failure".parse::<EventType>().unwrap(),
            EventType::AuthFailure
        );
        assert!("LOGIN".parse::<EventType>().is_err());
    }

    #[test]
    fn test_severity_ordering_and_policy() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Critical.is_fail_closed());
        assert!(Severity::High.is_fail_closed());
        assert!(!Severity::Medium.is_fail_closed());
        assert!(!Severity::Low.is_fail_closed());
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
    }

    #[test]
    fn test_event_serialization_uses_wire_names() {
        let event = AuditEvent::auth_failure("eve@example.com", "1.2.3.4");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"AUTH_FAILURE\""));
        assert!(json.contains("\"severity\":\"MEDIUM\""));
    }

    #[test]
    fn test_constructors() {
        let event = AuditEvent::auth_failure("eve@example.com", "1.2.3.4");
        assert!(!event.success);
        assert_eq!(event.actor.as_ref().and_then(Actor::key), Some("eve@example.com"));

        let event = AuditEvent::admin_action("admin-1", "10.0.0.1", "/admin/users/9", "DELETE")
            .with_target(Target::new("user", "9"));
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.target.unwrap().target_id.as_deref(), Some("9"));
    }

    #[test]
    fn test_seal_links_to_prev_hash() {
        let entry = sealed(AuditEvent::csp_violation("1.2.3.4", "https://evil.example"));
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash.len(), 64);
        assert_eq!(entry.recompute_hash(GENESIS_HASH), entry.hash);
        assert_ne!(entry.recompute_hash(&entry.hash), entry.hash);
    }

    #[test]
    fn test_resolution_is_outside_hash() {
        let mut entry = sealed(AuditEvent::auth_failure("eve@example.com", "1.2.3.4"));
        let before = entry.hash.clone();
        entry.resolution = Resolution {
            resolved: true,
            resolved_at: Some(Utc::now()),
            resolved_by: Some("ops".to_string()),
            notes: Some("known pentest".to_string()),
        };
        entry.archived = true;
        assert_eq!(entry.recompute_hash(GENESIS_HASH), before);
    }

    #[test]
    fn test_compaction_keeps_entry_verifiable() {
        let mut entry = sealed(
            AuditEvent::admin_action("admin-1", "10.0.0.1", "/admin/config", "PUT")
                .with_details(serde_json::json!({ "setting": "mfa", "value": true })),
        );
        entry.details = None;
        assert!(entry.is_compacted());
        assert_eq!(entry.recompute_hash(GENESIS_HASH), entry.hash);
    }

    #[test]
    fn test_tampered_details_change_hash() {
        let mut entry = sealed(
            AuditEvent::admin_action("admin-1", "10.0.0.1", "/admin/config", "PUT")
                .with_details(serde_json::json!({ "setting": "mfa", "value": true })),
        );
        entry.details = Some(serde_json::json!({ "setting": "mfa", "value": false }));
        assert_ne!(entry.recompute_hash(GENESIS_HASH), entry.hash);
    }

    #[test]
    fn test_null_details_survive_serialization() {
        let entry = sealed(AuditEvent::auth_failure("eve@example.com", "1.2.3.4"));
        assert_eq!(entry.details, Some(serde_json::Value::Null));

        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditLogEntry = serde_json::from_str(&json).unwrap();
        assert!(!back.is_compacted());
        assert_eq!(back, entry);

        let mut compacted = entry;
        compacted.details = None;
        let json = serde_json::to_string(&compacted).unwrap();
        assert!(!json.contains("\"details\""));
        let back: AuditLogEntry = serde_json::from_str(&json).unwrap();
        assert!(back.is_compacted());
    }
}
