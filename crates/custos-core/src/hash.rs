//! Canonical serialization and chain hashing.
//!
//! Hashing needs a deterministic byte representation, so nothing here relies
//! on the key order of a map implementation. [`canonical_json`] writes objects
//! with recursively sorted keys and no insignificant whitespace, and
//! [`HashedFields`] is rendered through the same writer.
//!
//! The entry hash is `SHA-256(canonical(fields) ‖ prev_hash)`, hex encoded.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::entry::{Actor, EventType, NetworkInfo, RequestInfo, Severity, Target};

/// `prev_hash` of the first entry in every chain.
///
/// 64 hex zeros, which is never the SHA-256 of real data.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// The integrity-relevant fields of an entry.
///
/// Resolution, archival state and the raw details payload are not part of
/// this set; the payload is covered through `details_digest`.
#[derive(Debug, Clone)]
pub struct HashedFields<'a> {
    /// Chain position.
    pub sequence: u64,
    /// Correlation identifier.
    pub event_id: &'a Uuid,
    /// Event type.
    pub event_type: EventType,
    /// Severity.
    pub severity: Severity,
    /// Acting user.
    pub actor: Option<&'a Actor>,
    /// Network origin.
    pub network: &'a NetworkInfo,
    /// Triggering request.
    pub request: &'a RequestInfo,
    /// Affected resource.
    pub target: Option<&'a Target>,
    /// SHA-256 of the canonical details.
    pub details_digest: String,
    /// Timestamp at millisecond precision.
    pub timestamp_ms: i64,
    /// Outcome.
    pub success: bool,
    /// Failure description.
    pub error_message: Option<&'a str>,
}

impl HashedFields<'_> {
    /// Renders the fields as a JSON value with a fixed schema.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("sequence".into(), Value::from(self.sequence));
        map.insert("eventId".into(), Value::from(self.event_id.to_string()));
        map.insert("type".into(), Value::from(self.event_type.as_str()));
        map.insert("severity".into(), Value::from(self.severity.as_str()));
        map.insert(
            "actor".into(),
            self.actor.map_or(Value::Null, |a| {
                object([
                    ("userId", opt(a.user_id.as_deref())),
                    ("email", opt(a.email.as_deref())),
                    ("role", opt(a.role.as_deref())),
                ])
            }),
        );
        map.insert(
            "network".into(),
            object([
                ("ip", Value::from(self.network.ip.as_str())),
                ("userAgent", Value::from(self.network.user_agent.as_str())),
            ]),
        );
        map.insert(
            "request".into(),
            object([
                ("path", Value::from(self.request.path.as_str())),
                ("method", Value::from(self.request.method.as_str())),
            ]),
        );
        map.insert(
            "target".into(),
            self.target.map_or(Value::Null, |t| {
                object([
                    ("targetType", opt(t.target_type.as_deref())),
                    ("targetId", opt(t.target_id.as_deref())),
                ])
            }),
        );
        map.insert("detailsDigest".into(), Value::from(self.details_digest.as_str()));
        map.insert("timestamp".into(), Value::from(self.timestamp_ms));
        map.insert("success".into(), Value::from(self.success));
        map.insert("errorMessage".into(), opt(self.error_message));
        Value::Object(map)
    }

    /// Returns the canonical bytes fed into the hash.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_json(&self.to_value()).into_bytes()
    }
}

fn opt(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// Computes an entry hash from its fields and its predecessor's hash.
///
/// Pure: the same inputs always produce the same hex digest.
#[must_use]
pub fn compute_hash(fields: &HashedFields<'_>, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fields.canonical_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 (hex) of the canonical form of a details payload.
#[must_use]
pub fn details_digest(details: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(details).as_bytes()))
}

/// Serializes a JSON value with recursively sorted object keys.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        // Null, Bool and Number have a single compact rendering.
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display of a string Value is its escaped JSON literal.
    out.push_str(&Value::from(s).to_string());
}
