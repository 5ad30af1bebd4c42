//! Catalogue entry types for operator-authored channel adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a catalogue entry.
///
/// Entries start `Disabled`, only serve traffic while `Enabled`, and land in
/// `Error` when a first load fails. An `Error` entry becomes `Enabled` again
/// only through a successful enable, which re-runs validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Disabled,
    Enabled,
    Error,
}

impl ScriptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStatus::Disabled => "disabled",
            ScriptStatus::Enabled => "enabled",
            ScriptStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disabled" => Some(ScriptStatus::Disabled),
            "enabled" => Some(ScriptStatus::Enabled),
            "error" => Some(ScriptStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured metadata an adapter declares about itself.
///
/// The required fields are enforced by the security validator against the
/// object the script's `exports()` returns; the optional fields feed the
/// channel-type discovery endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub channel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_test_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_validation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_config: Option<BTreeMap<String, String>>,
}

/// A persisted channel adapter: identity, source text, metadata, and
/// lifecycle state.
///
/// `channel_type` is unique across the catalogue regardless of status, so a
/// group name resolves to at most one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelScript {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub channel_type: String,
    pub script: String,
    pub metadata: ScriptMetadata,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    pub status: ScriptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a catalogue entry. New entries always start disabled.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChannelScript {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub version: String,
    pub channel_type: String,
    pub script: String,
    pub metadata: ScriptMetadata,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Partial update for an existing entry. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub channel_type: Option<String>,
    pub script: Option<String>,
    pub metadata: Option<ScriptMetadata>,
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ScriptUpdate {
    /// True when nothing in the patch would change validated content.
    pub fn is_content_unchanged(&self) -> bool {
        self.script.is_none() && self.metadata.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ScriptStatus::Disabled,
            ScriptStatus::Enabled,
            ScriptStatus::Error,
        ] {
            assert_eq!(ScriptStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ScriptStatus::parse("unknown"), None);
    }

    #[test]
    fn metadata_deserializes_without_optional_fields() {
        let metadata: ScriptMetadata = serde_json::from_str(
            r#"{
                "name": "grok",
                "version": "1.0.0",
                "description": "Grok adapter",
                "author": "ops",
                "channel_type": "grok"
            }"#,
        )
        .unwrap();
        assert_eq!(metadata.channel_type, "grok");
        assert!(metadata.supported_models.is_none());
        assert!(metadata.required_config.is_none());
    }
}
