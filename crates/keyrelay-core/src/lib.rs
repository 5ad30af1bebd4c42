//! Core domain for the keyrelay dynamic channel runtime.
//!
//! This crate holds the persisted catalogue model, the trait ports that the
//! infrastructure crates implement (repository, validator, log sink), and the
//! catalogue service that gates every mutation behind security validation.
//! No storage, HTTP, or scripting-engine types appear in any signature here.

pub mod domain;
pub mod ports;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::{
    ChannelScript, Group, GroupConfig, NewChannelScript, ScriptMetadata, ScriptStatus,
    ScriptUpdate, Upstream,
};
pub use ports::{
    CoreError, RepositoryError, ScriptLogRecord, ScriptLogSink, ScriptRepository, ScriptValidator,
    TestReport, ValidationError, ValidationReport,
};
pub use services::ScriptService;
