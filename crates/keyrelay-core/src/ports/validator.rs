//! Script security validator port.

use serde::Serialize;
use thiserror::Error;

use crate::domain::ScriptMetadata;

/// A validator rejection. The message is human-readable and surfaces to the
/// admin API verbatim; it never reaches proxy clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of `POST /scripts/validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: Some("Script is valid".to_string()),
            error: None,
        }
    }

    pub fn rejected(error: ValidationError) -> Self {
        Self {
            valid: false,
            message: None,
            error: Some(error.0),
        }
    }
}

/// Result of `POST /scripts/test`: validation plus an `exports()` smoke call
/// in a throwaway sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

/// Static + structural gate every adapter passes before it can execute
/// against live traffic.
///
/// Stateless and deterministic: validating the same source twice returns the
/// same result. Validation is CPU-bound (it parses and executes the source
/// once in a throwaway engine), so callers on async executors should run it
/// on a blocking thread.
pub trait ScriptValidator: Send + Sync {
    /// Run the full check sequence; the first failure aborts.
    fn validate(&self, source: &str, metadata: &ScriptMetadata) -> Result<(), ValidationError>;

    /// `validate` plus a smoke `exports()` invocation, reporting the runtime
    /// outcome for the test endpoint.
    fn smoke_test(&self, source: &str, metadata: &ScriptMetadata) -> TestReport;
}
