//! Adapter log sink port.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One log record emitted by an adapter through `utils.log`.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Read side of the per-script log buffer.
///
/// Records are process-local and bounded; they do not survive restarts.
pub trait ScriptLogSink: Send + Sync {
    /// Buffered records for a script name, oldest first. Empty when the
    /// script has never logged.
    fn records(&self, script_name: &str) -> Vec<ScriptLogRecord>;
}
