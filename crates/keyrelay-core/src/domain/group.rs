//! Routing-group types consumed by the channel runtime.
//!
//! Groups are owned by the surrounding gateway; the core only reads them to
//! resolve a channel type, build upstream descriptors, and marshal per-group
//! configuration into adapter hooks.

use serde::{Deserialize, Serialize};

fn default_weight() -> u32 {
    1
}

/// One upstream target of a group. Weights below 1 are normalized to 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Upstream {
    pub fn new(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight: weight.max(1),
        }
    }
}

/// Effective HTTP behavior for a group's outbound clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub response_header_timeout_secs: u64,
    pub idle_conn_timeout_secs: u64,
    pub max_idle_conns_per_host: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 600,
            response_header_timeout_secs: 60,
            idle_conn_timeout_secs: 120,
            max_idle_conns_per_host: 10,
        }
    }
}

/// A named routing target binding upstreams, a key pool, and a channel type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub channel_type: String,
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub test_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_endpoint: Option<String>,
    #[serde(default)]
    pub effective_config: GroupConfig,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}
