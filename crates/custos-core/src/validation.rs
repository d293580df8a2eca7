//! Ingestion-time validation of audit events.
//!
//! Collaborators call the ingestion contract with loosely typed request
//! metadata. Events are checked here before the chain is touched, so a
//! rejected event never consumes a sequence number.

use std::fmt;
use std::net::IpAddr;

use crate::entry::AuditEvent;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation, e.g. `network.ip`.
    pub field: String,
    /// A human-readable description of the failure.
    pub message: String,
    /// The kind of validation that failed.
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Creates a validation error for a required field that is missing.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' is required but was not provided"),
            field,
            kind: ValidationErrorKind::Required,
        }
    }

    /// Creates a validation error for an invalid format.
    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind: ValidationErrorKind::Format,
        }
    }

    /// Creates a validation error for a constraint violation.
    pub fn constraint(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind: ValidationErrorKind::Constraint,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// The category of validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A required field was not provided.
    Required,
    /// The value format is invalid.
    Format,
    /// A combination of fields is inconsistent.
    Constraint,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Format => write!(f, "format"),
            Self::Constraint => write!(f, "constraint"),
        }
    }
}

/// A collection of validation errors.
#[derive(Debug, Clone, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validation error.
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Returns true if there are no validation errors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of validation errors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns an iterator over the validation errors.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the whole collection if it holds any error.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl FromIterator<ValidationError> for ValidationErrors {
    fn from_iter<T: IntoIterator<Item = ValidationError>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no validation errors"),
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "{} validation errors: ", errors.len())?;
                let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "{}", joined.join("; "))
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Trait for types that can be validated.
pub trait Validate {
    /// Validates this instance and returns every failure found.
    ///
    /// # Errors
    ///
    /// Returns `ValidationErrors` containing all validation failures found.
    fn validate(&self) -> Result<(), ValidationErrors>;

    /// Returns true if this instance is valid.
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl Validate for AuditEvent {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let ip = self.network.ip.trim();
        if ip.is_empty() {
            errors.add(ValidationError::required("network.ip"));
        } else if ip.parse::<IpAddr>().is_err() {
            errors.add(ValidationError::format(
                "network.ip",
                format!("'{ip}' is not an IPv4 or IPv6 address"),
            ));
        }

        if self.request.path.trim().is_empty() {
            errors.add(ValidationError::required("request.path"));
        }

        let method = self.request.method.as_str();
        if method.is_empty() {
            errors.add(ValidationError::required("request.method"));
        } else if !method.bytes().all(|b| b.is_ascii_uppercase()) {
            errors.add(ValidationError::format(
                "request.method",
                format!("'{method}' must be an uppercase HTTP method token"),
            ));
        }

        if !(self.details.is_object() || self.details.is_null()) {
            errors.add(ValidationError::format(
                "details",
                "must be a JSON object or null",
            ));
        }

        if self.success && self.error_message.is_some() {
            errors.add(ValidationError::constraint(
                "error_message",
                "only allowed when success is false",
            ));
        }

        errors.into_result()
    }
}

impl AuditEvent {
    /// Rewrites request metadata into the form that gets sealed.
    ///
    /// The IP is stored in its canonical textual form (no padding, IPv6
    /// compressed and lowercase) so every spelling of one address groups as
    /// the same anomaly subject. Values that do not parse are left alone;
    /// [`Validate::validate`] rejects those.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let Ok(ip) = self.network.ip.trim().parse::<IpAddr>() {
            self.network.ip = ip.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EventType, Severity};

    fn event() -> AuditEvent {
        AuditEvent::new(EventType::AdminAction, Severity::High, "10.1.2.3", "/admin", "POST")
    }

    #[test]
    fn test_valid_event() {
        assert!(event().is_valid());
        assert!(AuditEvent::auth_failure("eve@example.com", "2001:db8::1").is_valid());
    }

    #[test]
    fn test_missing_network_and_request_fields() {
        let mut e = event();
        e.network.ip = String::new();
        e.request.path = "  ".to_string();
        e.request.method = String::new();

        let errors = e.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["network.ip", "request.path", "request.method"]);
        assert!(errors.iter().all(|e| e.kind == ValidationErrorKind::Required));
    }

    #[test]
    fn test_bad_ip_and_method_format() {
        let mut e = event();
        e.network.ip = "not-an-ip".to_string();
        e.request.method = "post".to_string();

        let errors = e.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ValidationErrorKind::Format));
    }

    #[test]
    fn test_details_must_be_object() {
        let e = event().with_details(serde_json::json!([1, 2, 3]));
        let errors = e.validate().unwrap_err();
        assert_eq!(errors.iter().next().unwrap().field, "details");
    }

    #[test]
    fn test_error_message_requires_failure() {
        let mut e = event();
        e.error_message = Some("boom".to_string());
        let errors = e.validate().unwrap_err();
        assert_eq!(errors.iter().next().unwrap().kind, ValidationErrorKind::Constraint);

        assert!(event().failed("boom").is_valid());
    }

    #[test]
    fn test_validation_errors_display() {
        let errors = ValidationErrors::new();
        assert_eq!(errors.to_string(), "no validation errors");

        let errors: ValidationErrors = vec![
            ValidationError::required("a"),
            ValidationError::format("b", "bad"),
        ]
        .into_iter()
        .collect();
        let display = errors.to_string();
        assert!(display.starts_with("2 validation errors"));
        assert!(display.contains("'a'"));
        assert!(display.contains("bad"));
    }

    #[test]
    fn test_normalized_ip_spellings_collapse() {
        for raw in ["1.2.3.4", " 1.2.3.4", "1.2.3.4 \t"] {
            let mut e = event();
            e.network.ip = raw.to_string();
            assert!(e.is_valid());
            assert_eq!(e.normalized().network.ip, "1.2.3.4");
        }

        let mut e = event();
        e.network.ip = "2001:DB8:0:0::1".to_string();
        assert_eq!(e.normalized().network.ip, "2001:db8::1");

        let mut e = event();
        e.network.ip = "not-an-ip".to_string();
        assert_eq!(e.normalized().network.ip, "not-an-ip");
    }
}
