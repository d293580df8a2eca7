//! Error types for the test harness.

use std::path::PathBuf;

use custos_audit::AuditError;
use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Errors raised while loading or seeding fixtures.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// Failed to read a fixture file.
    #[error("failed to read fixture file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing error.
    #[error("failed to parse YAML fixture: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON fixture: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported fixture file extension.
    #[error("unsupported fixture format: {path}")]
    UnsupportedFormat {
        /// File path.
        path: PathBuf,
    },

    /// The audit service rejected a seeded event.
    #[error("seeding fixture '{fixture}' failed: {source}")]
    Seed {
        /// Name (or index) of the fixture that failed.
        fixture: String,
        /// Underlying audit error.
        #[source]
        source: AuditError,
    },

    /// Any other audit error raised by the harness.
    #[error(transparent)]
    Audit(#[from] AuditError),
}
