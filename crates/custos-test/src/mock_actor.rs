//! Mock actors for audit tests.
//!
//! # Examples
//!
//! ```rust
//! use custos_test::MockActor;
//!
//! let admin = MockActor::admin();
//! assert_eq!(admin.role.as_deref(), Some("admin"));
//!
//! let user = MockActor::new("user-42")
//!     .with_email("user42@example.com")
//!     .with_role("author")
//!     .build();
//! assert_eq!(user.user_id.as_deref(), Some("user-42"));
//! ```

use custos_core::{Actor, AuditEvent};

/// Builder for [`Actor`] values.
#[derive(Debug, Clone, Default)]
pub struct MockActor {
    user_id: Option<String>,
    email: Option<String>,
    role: Option<String>,
}

impl MockActor {
    /// Creates a mock actor with a user ID.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Creates an actor known only by email, like a failed login attempt.
    #[must_use]
    pub fn anonymous(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// An administrator, `mock-admin` with role `admin`.
    #[must_use]
    pub fn admin() -> Actor {
        Self::new("mock-admin")
            .with_email("admin@example.com")
            .with_role("admin")
            .build()
    }

    /// A regular user, `mock-reader` with role `reader`.
    #[must_use]
    pub fn reader() -> Actor {
        Self::new("mock-reader").with_role("reader").build()
    }

    /// Someone guessing passwords for `victim@example.com`.
    #[must_use]
    pub fn attacker() -> Actor {
        Self::anonymous("victim@example.com").build()
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

    /// Builds the actor.
    #[must_use]
    pub fn build(self) -> Actor {
        Actor {
            user_id: self.user_id,
            email: self.email,
            role: self.role,
        }
    }
}

/// Canned events for common scenarios.
pub mod events {
    use super::{AuditEvent, MockActor};

    /// `n` failed logins for `email` from `ip`.
    #[must_use]
    pub fn failed_logins(email: &str, ip: &str, n: usize) -> Vec<AuditEvent> {
        (0..n).map(|_| AuditEvent::auth_failure(email, ip)).collect()
    }

    /// `n` successful admin actions by the mock admin.
    #[must_use]
    pub fn admin_actions(n: usize) -> Vec<AuditEvent> {
        (0..n)
            .map(|i| {
                AuditEvent::admin_action("mock-admin", "10.0.0.1", &format!("/admin/posts/{i}"), "DELETE")
                    .with_actor(MockActor::admin())
            })
            .collect()
    }

    /// One denied request per path for `user_id`.
    #[must_use]
    pub fn probing(user_id: &str, ip: &str, paths: &[&str]) -> Vec<AuditEvent> {
        paths
            .iter()
            .map(|path| AuditEvent::permission_denied(user_id, ip, path, "GET"))
            .collect()
    }
}
