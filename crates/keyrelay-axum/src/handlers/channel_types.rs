//! Channel-type discovery endpoints.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use keyrelay_channel::static_channels::static_defaults;
use keyrelay_core::ScriptMetadata;

use crate::error::HttpError;
use crate::response::success;
use crate::state::AppState;

/// Channel type information with metadata and default values.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelTypeInfo {
    #[serde(rename = "type")]
    pub channel_type: String,
    pub is_script: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_test_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_validation_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_upstream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_config: Option<BTreeMap<String, String>>,
}

/// Union of static and dynamic channel type tags.
pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    Ok(success(state.factory.registered_channel_types()))
}

/// Channel types with metadata and defaults for the admin UI.
pub async fn list_with_metadata(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    let mut infos = Vec::new();

    for channel_type in state.factory.registered_channel_types() {
        let info = if let Some(script) = state.factory.dynamic_script(&channel_type) {
            let metadata = &script.metadata;
            ChannelTypeInfo {
                channel_type: channel_type.clone(),
                is_script: true,
                display_name: Some(script.display_name.clone()),
                description: Some(script.description.clone()),
                default_test_model: metadata.default_test_model.clone(),
                default_validation_endpoint: metadata.default_validation_endpoint.clone(),
                default_upstream: Some(default_upstream_for_script(&channel_type, metadata)),
                supported_models: metadata.supported_models.clone(),
                required_config: metadata.required_config.clone(),
            }
        } else {
            static_channel_info(&channel_type)
        };
        infos.push(info);
    }

    Ok(success(infos))
}

fn static_channel_info(channel_type: &str) -> ChannelTypeInfo {
    match static_defaults(channel_type) {
        Some(defaults) => ChannelTypeInfo {
            channel_type: channel_type.to_string(),
            is_script: false,
            display_name: Some(defaults.display_name.to_string()),
            description: None,
            default_test_model: Some(defaults.default_test_model.to_string()),
            default_validation_endpoint: Some(defaults.default_validation_endpoint.to_string()),
            default_upstream: Some(defaults.default_upstream.to_string()),
            supported_models: Some(
                defaults
                    .supported_models
                    .iter()
                    .map(|m| m.to_string())
                    .collect(),
            ),
            required_config: None,
        },
        None => {
            let mut display = channel_type.to_string();
            if let Some(first) = display.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            ChannelTypeInfo {
                channel_type: channel_type.to_string(),
                is_script: false,
                display_name: Some(display),
                description: None,
                default_test_model: Some("default-model".to_string()),
                default_validation_endpoint: Some("/v1/models".to_string()),
                default_upstream: Some("https://api.example.com".to_string()),
                supported_models: None,
                required_config: None,
            }
        }
    }
}

/// Default upstream for a script-backed type: a small table for well-known
/// types, then a `default: <url>` hint inside the `base_url` config
/// description, then a generic fallback.
fn default_upstream_for_script(channel_type: &str, metadata: &ScriptMetadata) -> String {
    match channel_type {
        "grok" => return "https://api.x.ai".to_string(),
        "tavily_search" => return "https://api.tavily.com".to_string(),
        "custom_service" => return "https://api.example.com".to_string(),
        _ => {}
    }

    if let Some(required) = &metadata.required_config {
        if let Some(hint) = required.get("base_url") {
            if let Some(index) = hint.find("default:") {
                let url = hint[index + "default:".len()..]
                    .trim()
                    .trim_end_matches(')')
                    .trim();
                if !url.is_empty() {
                    return url.to_string();
                }
            }
        }
    }

    "https://api.example.com".to_string()
}
