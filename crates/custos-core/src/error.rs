//! Error types for Custos core operations.

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Custos core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The submitted event failed ingestion validation.
    #[error("invalid audit event: {0}")]
    InvalidEvent(#[from] ValidationErrors),

    /// An event type name could not be parsed.
    #[error("unknown event type: {value}")]
    UnknownEventType {
        /// The rejected value.
        value: String,
    },

    /// A severity name could not be parsed.
    #[error("unknown severity: {value}")]
    UnknownSeverity {
        /// The rejected value.
        value: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
