//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the core expects from infrastructure: the
//! catalogue store, the script security validator, and the adapter log sink.
//! They contain no implementation details and use only domain types.

pub mod log_sink;
pub mod script_repository;
pub mod validator;

use thiserror::Error;

pub use log_sink::{ScriptLogRecord, ScriptLogSink};
pub use script_repository::ScriptRepository;
pub use validator::{ScriptValidator, TestReport, ValidationError, ValidationReport};

/// Domain-specific errors for catalogue storage operations.
///
/// Abstracts away the backing store so services never see driver errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entry was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entry with the same identifier already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A uniqueness or integrity constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Canonical error type for catalogue operations.
///
/// Adapters map this onto their own surfaces (HTTP status codes, CLI exit
/// codes).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The script failed security validation. The message is surfaced to
    /// admin clients verbatim.
    #[error("script validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid input that is not a validator rejection.
    #[error("Validation error: {0}")]
    InvalidInput(String),

    /// Internal error (unexpected condition).
    #[error("Internal error: {0}")]
    Internal(String),
}
