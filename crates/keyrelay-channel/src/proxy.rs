//! The channel contract: five request-path hooks plus staleness.

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use keyrelay_core::Group;

use crate::error::ChannelError;

/// Outbound request under construction on the proxy path.
///
/// Headers are an ordered multimap; adapter writes use set semantics
/// (replace every existing value for the name, case-insensitively).
#[derive(Debug, Clone, Default)]
pub struct UpstreamRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl UpstreamRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Replace every value of `name`, appending if absent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// First value of `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// JSON snapshot marshalled into `modifyRequest`: single-valued header
    /// and query maps, first value wins on duplicates. The body is not
    /// exposed; adapters may only replace it.
    pub fn snapshot(&self) -> Value {
        let mut headers = serde_json::Map::new();
        for (name, value) in &self.headers {
            headers
                .entry(name.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        let mut query = serde_json::Map::new();
        if let Ok(parsed) = Url::parse(&self.url) {
            for (name, value) in parsed.query_pairs() {
                query
                    .entry(name.to_string())
                    .or_insert_with(|| Value::String(value.to_string()));
            }
        }

        json!({
            "method": self.method,
            "url": self.url,
            "headers": Value::Object(headers),
            "query": Value::Object(query),
        })
    }
}

/// Transient per-request context handed to the read-only hooks.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub original_url: String,
}

impl RequestContext {
    /// JSON snapshot marshalled into `isStreamRequest` / `extractModel`.
    pub fn snapshot(&self) -> Value {
        let mut headers = serde_json::Map::new();
        for (name, value) in &self.headers {
            headers
                .entry(name.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        let mut query = serde_json::Map::new();
        for (name, value) in &self.query {
            query
                .entry(name.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        json!({
            "request": {
                "method": self.method,
                "url": self.url,
                "headers": Value::Object(headers),
                "query": Value::Object(query),
            },
            "body_bytes": String::from_utf8_lossy(&self.body).into_owned(),
            "original_url": self.original_url,
        })
    }
}

/// Outcome of key validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidation {
    pub valid: bool,
    pub error: Option<String>,
}

impl KeyValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// One bound upstream integration serving a group.
///
/// The proxy path calls `build_upstream_url`, `modify_request`,
/// `is_stream_request`, and `extract_model` in that order for each request;
/// `validate_key` runs out of band during key onboarding and revalidation.
#[async_trait]
pub trait ChannelProxy: Send + Sync {
    /// The channel type tag this instance serves.
    fn channel_type(&self) -> &str;

    /// Resolve the absolute upstream URL for an inbound request path.
    async fn build_upstream_url(
        &self,
        original_url: &str,
        group: &Group,
    ) -> Result<String, ChannelError>;

    /// Rewrite the outbound request (credentials, headers, body).
    async fn modify_request(
        &self,
        request: &mut UpstreamRequest,
        api_key: &str,
        group: &Group,
    ) -> Result<(), ChannelError>;

    /// Whether the request expects a streamed response. Side-effect-free;
    /// failures degrade to `false`.
    async fn is_stream_request(&self, context: &RequestContext) -> bool;

    /// Model named by the request; empty string means unknown.
    async fn extract_model(&self, context: &RequestContext) -> String;

    /// Check one pool key against the upstream.
    async fn validate_key(&self, key: &str, group: &Group) -> KeyValidation;

    /// Whether the cached instance no longer matches the group's effective
    /// configuration.
    fn is_config_stale(&self, group: &Group) -> bool;
}
