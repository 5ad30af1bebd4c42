//! Shared per-group channel state: upstream descriptors, HTTP clients, and
//! the configuration hash that drives cache staleness.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use rand::Rng;
use url::Url;

use keyrelay_core::Group;

use crate::error::ChannelError;

/// One parsed upstream with its selection weight.
#[derive(Debug, Clone)]
pub struct UpstreamInfo {
    pub url: Url,
    pub weight: u32,
}

/// Per-group pre-computed channel state, embedded by every channel kind.
pub struct BaseChannel {
    channel_type: String,
    upstreams: Vec<UpstreamInfo>,
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
    test_model: String,
    validation_endpoint: Option<String>,
    config_hash: u64,
}

impl BaseChannel {
    pub fn new(channel_type: &str, group: &Group) -> Result<Self, ChannelError> {
        if group.upstreams.is_empty() {
            return Err(ChannelError::NoUpstreams(channel_type.to_string()));
        }

        let mut upstreams = Vec::with_capacity(group.upstreams.len());
        for upstream in &group.upstreams {
            let url = Url::parse(&upstream.url).map_err(|err| ChannelError::InvalidUpstream {
                url: upstream.url.clone(),
                message: err.to_string(),
            })?;
            upstreams.push(UpstreamInfo {
                url,
                weight: upstream.weight.max(1),
            });
        }

        let config = &group.effective_config;
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .build()
            .map_err(|err| ChannelError::HttpClient(err.to_string()))?;

        // Streaming requests get an unbounded total deadline and a larger
        // idle pool so long-lived responses do not exhaust the regular pool.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
            .pool_max_idle_per_host((config.max_idle_conns_per_host * 2).max(20))
            .build()
            .map_err(|err| ChannelError::HttpClient(err.to_string()))?;

        Ok(Self {
            channel_type: channel_type.to_string(),
            upstreams,
            http_client,
            stream_client,
            test_model: group.test_model.clone(),
            validation_endpoint: group.validation_endpoint.clone(),
            config_hash: config_hash(group),
        })
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn upstreams(&self) -> &[UpstreamInfo] {
        &self.upstreams
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn stream_client(&self) -> &reqwest::Client {
        &self.stream_client
    }

    pub fn test_model(&self) -> &str {
        &self.test_model
    }

    pub fn validation_endpoint(&self) -> Option<&str> {
        self.validation_endpoint.as_deref()
    }

    /// Weighted random upstream selection.
    pub fn pick_upstream(&self) -> &UpstreamInfo {
        let total: u32 = self.upstreams.iter().map(|u| u.weight).sum();
        let mut roll = rand::thread_rng().gen_range(0..total);
        for upstream in &self.upstreams {
            if roll < upstream.weight {
                return upstream;
            }
            roll -= upstream.weight;
        }
        &self.upstreams[0]
    }

    /// Default URL construction: upstream base plus the original path and
    /// query, verbatim.
    pub fn default_upstream_url(&self, original_url: &str) -> String {
        let upstream = self.pick_upstream();
        let base = upstream.url.as_str().trim_end_matches('/');
        if original_url.is_empty() {
            return base.to_string();
        }
        if original_url.starts_with('/') {
            format!("{base}{original_url}")
        } else {
            format!("{base}/{original_url}")
        }
    }

    /// A cached channel is stale once the group's effective configuration
    /// diverges from the one it was built with.
    pub fn is_config_stale(&self, group: &Group) -> bool {
        self.config_hash != config_hash(group)
    }
}

/// Cheap identity hash over everything that should force a rebuild when it
/// changes: channel type, upstream set, and effective config.
fn config_hash(group: &Group) -> u64 {
    let mut hasher = DefaultHasher::new();
    group.channel_type.hash(&mut hasher);
    group.test_model.hash(&mut hasher);
    group.validation_endpoint.hash(&mut hasher);
    for upstream in &group.upstreams {
        upstream.url.hash(&mut hasher);
        upstream.weight.hash(&mut hasher);
    }
    if let Ok(config) = serde_json::to_string(&group.effective_config) {
        config.hash(&mut hasher);
    }
    if let Ok(config) = serde_json::to_string(&group.config) {
        config.hash(&mut hasher);
    }
    hasher.finish()
}
