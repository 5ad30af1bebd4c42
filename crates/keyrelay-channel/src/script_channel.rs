//! Script-backed channel: a `ChannelProxy` over a sandboxed adapter.
//!
//! Hooks are delegated to the shared adapter instance with JSON-snapshot
//! arguments. Failure semantics follow the hook contract: URL resolution is
//! fatal to the request, mutation errors abort it, and the read-only hooks
//! degrade to their neutral values.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use keyrelay_core::{ChannelScript, Group};
use keyrelay_script::headers::is_allowed_header;
use keyrelay_script::{HookKind, ScriptError, ScriptInstance};

use crate::base::BaseChannel;
use crate::error::ChannelError;
use crate::proxy::{ChannelProxy, KeyValidation, RequestContext, UpstreamRequest};

pub struct ScriptChannel {
    base: BaseChannel,
    instance: Arc<ScriptInstance>,
}

impl ScriptChannel {
    pub fn new(
        group: &Group,
        script: &ChannelScript,
        instance: Arc<ScriptInstance>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            base: BaseChannel::new(&script.channel_type, group)?,
            instance,
        })
    }

    fn group_json(group: &Group) -> Value {
        serde_json::to_value(group).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl ChannelProxy for ScriptChannel {
    fn channel_type(&self) -> &str {
        self.base.channel_type()
    }

    async fn build_upstream_url(
        &self,
        original_url: &str,
        group: &Group,
    ) -> Result<String, ChannelError> {
        let result = self
            .instance
            .invoke(
                HookKind::BuildUpstreamUrl,
                vec![Value::String(original_url.to_string()), Self::group_json(group)],
            )
            .await;

        match result {
            Ok(Value::String(url)) => Ok(url),
            Ok(other) => Err(ChannelError::UpstreamResolution(format!(
                "buildUpstreamURL returned a non-string: {other}"
            ))),
            // An adapter without the hook falls back to the default join.
            Err(ScriptError::MissingHook(_)) => Ok(self.base.default_upstream_url(original_url)),
            Err(err) => Err(ChannelError::UpstreamResolution(err.to_string())),
        }
    }

    async fn modify_request(
        &self,
        request: &mut UpstreamRequest,
        api_key: &str,
        group: &Group,
    ) -> Result<(), ChannelError> {
        let result = self
            .instance
            .invoke(
                HookKind::ModifyRequest,
                vec![
                    request.snapshot(),
                    Value::String(api_key.to_string()),
                    Self::group_json(group),
                ],
            )
            .await;

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(ScriptError::MissingHook(_)) => return Ok(()),
            Err(err) => {
                error!(
                    script = %self.instance.script_name(),
                    error = %err,
                    "modifyRequest hook failed"
                );
                return Err(ChannelError::RequestMutation(err.to_string()));
            }
        };

        // Header writes are reapplied onto the outbound request; the
        // hop-by-hop denylist is enforced again here. Overwrite-only:
        // adapters cannot delete a header by omitting it.
        if let Some(headers) = snapshot.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if is_allowed_header(name, &value) {
                    request.set_header(name, &value);
                }
            }
        }

        // Body replacement is taken verbatim when the adapter set a string.
        if let Some(Value::String(body)) = snapshot.get("body") {
            request.body = Some(body.clone().into_bytes());
        }

        Ok(())
    }

    async fn is_stream_request(&self, context: &RequestContext) -> bool {
        match self
            .instance
            .invoke(HookKind::IsStreamRequest, vec![context.snapshot()])
            .await
        {
            Ok(Value::Bool(streaming)) => streaming,
            Ok(_) => false,
            Err(err) => {
                debug!(
                    script = %self.instance.script_name(),
                    error = %err,
                    "isStreamRequest hook failed, defaulting to false"
                );
                false
            }
        }
    }

    async fn extract_model(&self, context: &RequestContext) -> String {
        match self
            .instance
            .invoke(HookKind::ExtractModel, vec![context.snapshot()])
            .await
        {
            Ok(Value::String(model)) => model,
            Ok(_) => String::new(),
            Err(err) => {
                debug!(
                    script = %self.instance.script_name(),
                    error = %err,
                    "extractModel hook failed, defaulting to empty model"
                );
                String::new()
            }
        }
    }

    async fn validate_key(&self, key: &str, group: &Group) -> KeyValidation {
        let config = serde_json::to_value(&group.effective_config).unwrap_or(Value::Null);
        let result = self
            .instance
            .invoke(
                HookKind::ValidateKey,
                vec![Value::String(key.to_string()), config],
            )
            .await;

        match result {
            Ok(record) => {
                let valid = record
                    .get("valid")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if valid {
                    KeyValidation::valid()
                } else {
                    let message = record
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("key validation failed");
                    KeyValidation::invalid(message)
                }
            }
            Err(err) => KeyValidation::invalid(err.to_string()),
        }
    }

    fn is_config_stale(&self, group: &Group) -> bool {
        self.base.is_config_stale(group)
    }
}
