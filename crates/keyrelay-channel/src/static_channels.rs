//! Built-in channels compiled into the gateway.
//!
//! These cover the upstream families common enough to not need a script:
//! OpenAI-shaped APIs, Anthropic, and Google Gemini. Everything else is a
//! dynamic script channel.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use keyrelay_core::Group;

use crate::base::BaseChannel;
use crate::error::ChannelError;
use crate::proxy::{ChannelProxy, KeyValidation, RequestContext, UpstreamRequest};

/// Channel types with a compiled-in constructor.
pub const STATIC_CHANNEL_TYPES: &[&str] = &["openai", "anthropic", "gemini"];

/// Discovery defaults for one static channel type.
pub struct StaticChannelDefaults {
    pub display_name: &'static str,
    pub default_test_model: &'static str,
    pub default_validation_endpoint: &'static str,
    pub default_upstream: &'static str,
    pub supported_models: &'static [&'static str],
}

/// Hardcoded defaults surfaced by the channel-type discovery endpoint.
pub fn static_defaults(channel_type: &str) -> Option<StaticChannelDefaults> {
    match channel_type {
        "openai" => Some(StaticChannelDefaults {
            display_name: "OpenAI",
            default_test_model: "gpt-4",
            default_validation_endpoint: "/v1/models",
            default_upstream: "https://api.openai.com",
            supported_models: &["gpt-4", "gpt-3.5-turbo", "gpt-4-turbo"],
        }),
        "anthropic" => Some(StaticChannelDefaults {
            display_name: "Anthropic Claude",
            default_test_model: "claude-3-haiku-20240307",
            default_validation_endpoint: "/v1/messages",
            default_upstream: "https://api.anthropic.com",
            supported_models: &[
                "claude-3-haiku-20240307",
                "claude-3-sonnet-20240229",
                "claude-3-opus-20240229",
            ],
        }),
        "gemini" => Some(StaticChannelDefaults {
            display_name: "Google Gemini",
            default_test_model: "gemini-pro",
            default_validation_endpoint: "/v1/models",
            default_upstream: "https://generativelanguage.googleapis.com",
            supported_models: &["gemini-pro", "gemini-pro-vision"],
        }),
        _ => None,
    }
}

/// Build a static channel for a group, if its type has one.
pub fn build_static_channel(
    group: &Group,
) -> Option<Result<Arc<dyn ChannelProxy>, ChannelError>> {
    match group.channel_type.as_str() {
        "openai" => Some(OpenAiChannel::new(group).map(|c| Arc::new(c) as Arc<dyn ChannelProxy>)),
        "anthropic" => {
            Some(AnthropicChannel::new(group).map(|c| Arc::new(c) as Arc<dyn ChannelProxy>))
        }
        "gemini" => Some(GeminiChannel::new(group).map(|c| Arc::new(c) as Arc<dyn ChannelProxy>)),
        _ => None,
    }
}

fn body_json(context: &RequestContext) -> Option<Value> {
    serde_json::from_slice(&context.body).ok()
}

fn body_stream_flag(context: &RequestContext) -> bool {
    body_json(context)
        .and_then(|body| body.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

fn body_model(context: &RequestContext) -> String {
    body_json(context)
        .and_then(|body| {
            body.get("model")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// OpenAI-shaped upstreams: bearer credentials, `stream` flag in the body.
pub struct OpenAiChannel {
    base: BaseChannel,
}

impl OpenAiChannel {
    pub fn new(group: &Group) -> Result<Self, ChannelError> {
        Ok(Self {
            base: BaseChannel::new("openai", group)?,
        })
    }
}

#[async_trait]
impl ChannelProxy for OpenAiChannel {
    fn channel_type(&self) -> &str {
        self.base.channel_type()
    }

    async fn build_upstream_url(
        &self,
        original_url: &str,
        _group: &Group,
    ) -> Result<String, ChannelError> {
        Ok(self.base.default_upstream_url(original_url))
    }

    async fn modify_request(
        &self,
        request: &mut UpstreamRequest,
        api_key: &str,
        _group: &Group,
    ) -> Result<(), ChannelError> {
        request.set_header("Authorization", &format!("Bearer {api_key}"));
        Ok(())
    }

    async fn is_stream_request(&self, context: &RequestContext) -> bool {
        body_stream_flag(context)
    }

    async fn extract_model(&self, context: &RequestContext) -> String {
        body_model(context)
    }

    async fn validate_key(&self, key: &str, _group: &Group) -> KeyValidation {
        let endpoint = self.base.validation_endpoint().unwrap_or("/v1/models");
        let url = self.base.default_upstream_url(endpoint);
        match self
            .base
            .http_client()
            .get(url)
            .bearer_auth(key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => KeyValidation::valid(),
            Ok(response) => {
                KeyValidation::invalid(format!("validation returned status {}", response.status()))
            }
            Err(err) => KeyValidation::invalid(err.to_string()),
        }
    }

    fn is_config_stale(&self, group: &Group) -> bool {
        self.base.is_config_stale(group)
    }
}

/// Anthropic: `x-api-key` credentials and a pinned API version header.
pub struct AnthropicChannel {
    base: BaseChannel,
}

impl AnthropicChannel {
    pub fn new(group: &Group) -> Result<Self, ChannelError> {
        Ok(Self {
            base: BaseChannel::new("anthropic", group)?,
        })
    }
}

#[async_trait]
impl ChannelProxy for AnthropicChannel {
    fn channel_type(&self) -> &str {
        self.base.channel_type()
    }

    async fn build_upstream_url(
        &self,
        original_url: &str,
        _group: &Group,
    ) -> Result<String, ChannelError> {
        Ok(self.base.default_upstream_url(original_url))
    }

    async fn modify_request(
        &self,
        request: &mut UpstreamRequest,
        api_key: &str,
        _group: &Group,
    ) -> Result<(), ChannelError> {
        request.set_header("x-api-key", api_key);
        if request.header("anthropic-version").is_none() {
            request.set_header("anthropic-version", "2023-06-01");
        }
        Ok(())
    }

    async fn is_stream_request(&self, context: &RequestContext) -> bool {
        body_stream_flag(context)
    }

    async fn extract_model(&self, context: &RequestContext) -> String {
        body_model(context)
    }

    async fn validate_key(&self, key: &str, _group: &Group) -> KeyValidation {
        let endpoint = self.base.validation_endpoint().unwrap_or("/v1/models");
        let url = self.base.default_upstream_url(endpoint);
        match self
            .base
            .http_client()
            .get(url)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => KeyValidation::valid(),
            Ok(response) => {
                KeyValidation::invalid(format!("validation returned status {}", response.status()))
            }
            Err(err) => KeyValidation::invalid(err.to_string()),
        }
    }

    fn is_config_stale(&self, group: &Group) -> bool {
        self.base.is_config_stale(group)
    }
}

/// Gemini: key travels as a query parameter; streaming is part of the path.
pub struct GeminiChannel {
    base: BaseChannel,
}

impl GeminiChannel {
    pub fn new(group: &Group) -> Result<Self, ChannelError> {
        Ok(Self {
            base: BaseChannel::new("gemini", group)?,
        })
    }

    fn model_from_path(url: &str) -> Option<String> {
        let start = url.find("/models/")? + "/models/".len();
        let rest = &url[start..];
        let end = rest
            .find(|c| c == ':' || c == '/' || c == '?')
            .unwrap_or(rest.len());
        let model = &rest[..end];
        (!model.is_empty()).then(|| model.to_string())
    }
}

#[async_trait]
impl ChannelProxy for GeminiChannel {
    fn channel_type(&self) -> &str {
        self.base.channel_type()
    }

    async fn build_upstream_url(
        &self,
        original_url: &str,
        _group: &Group,
    ) -> Result<String, ChannelError> {
        Ok(self.base.default_upstream_url(original_url))
    }

    async fn modify_request(
        &self,
        request: &mut UpstreamRequest,
        api_key: &str,
        _group: &Group,
    ) -> Result<(), ChannelError> {
        let separator = if request.url.contains('?') { '&' } else { '?' };
        request.url = format!("{}{}key={}", request.url, separator, api_key);
        Ok(())
    }

    async fn is_stream_request(&self, context: &RequestContext) -> bool {
        context.url.contains(":streamGenerateContent")
            || context
                .query
                .iter()
                .any(|(name, value)| name == "alt" && value == "sse")
    }

    async fn extract_model(&self, context: &RequestContext) -> String {
        Self::model_from_path(&context.url).unwrap_or_else(|| body_model(context))
    }

    async fn validate_key(&self, key: &str, _group: &Group) -> KeyValidation {
        let endpoint = self.base.validation_endpoint().unwrap_or("/v1/models");
        let base_url = self.base.default_upstream_url(endpoint);
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let url = format!("{base_url}{separator}key={key}");
        match self.base.http_client().get(url).send().await {
            Ok(response) if response.status().is_success() => KeyValidation::valid(),
            Ok(response) => {
                KeyValidation::invalid(format!("validation returned status {}", response.status()))
            }
            Err(err) => KeyValidation::invalid(err.to_string()),
        }
    }

    fn is_config_stale(&self, group: &Group) -> bool {
        self.base.is_config_stale(group)
    }
}
