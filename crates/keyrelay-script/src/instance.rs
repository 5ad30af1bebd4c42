//! Adapter instance: one compiled script bound to one sandboxed VM.
//!
//! The engine is not `Send`, so each instance owns a dedicated worker thread
//! that holds the VM and the channel object `exports()` returned. Hooks
//! arrive over a mailbox as JSON snapshots and are answered on oneshot
//! channels; the mailbox serializes hook execution per instance. Dropping the
//! instance closes the mailbox, which tears the VM down on the worker.

use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{js_string, JsObject, JsString, JsValue};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use keyrelay_core::ChannelScript;

use crate::error::ScriptError;
use crate::logs::ScriptLogStore;
use crate::sandbox::{HostContext, Sandbox};

/// Host-side deadline for a single hook invocation. A timeout abandons the
/// invocation only; the instance stays usable.
const HOOK_DEADLINE: Duration = Duration::from_secs(30);

/// The five request-path hooks of the adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BuildUpstreamUrl,
    ModifyRequest,
    IsStreamRequest,
    ExtractModel,
    ValidateKey,
}

impl HookKind {
    pub fn method(self) -> &'static str {
        match self {
            HookKind::BuildUpstreamUrl => "buildUpstreamURL",
            HookKind::ModifyRequest => "modifyRequest",
            HookKind::IsStreamRequest => "isStreamRequest",
            HookKind::ExtractModel => "extractModel",
            HookKind::ValidateKey => "validateKey",
        }
    }
}

struct HookCall {
    hook: HookKind,
    args: Vec<Value>,
    reply: oneshot::Sender<Result<Value, ScriptError>>,
}

/// A live adapter: worker thread + VM + channel object.
pub struct ScriptInstance {
    script_name: String,
    channel_type: String,
    calls: mpsc::UnboundedSender<HookCall>,
}

impl ScriptInstance {
    /// Build the VM, evaluate the source, call `exports()`, and run the
    /// optional `initialize(config)` hook. Blocking; run on a blocking thread
    /// when calling from async code.
    pub fn spawn(script: &ChannelScript, logs: Arc<ScriptLogStore>) -> Result<Self, ScriptError> {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let source = script.script.clone();
        let config = Value::Object(script.config.clone());
        let script_name = script.name.clone();
        let channel_type = script.channel_type.clone();

        thread::Builder::new()
            .name(format!("keyrelay-script-{script_name}"))
            .spawn({
                let script_name = script_name.clone();
                let channel_type = channel_type.clone();
                move || worker(source, config, script_name, channel_type, logs, calls_rx, ready_tx)
            })
            .map_err(|err| ScriptError::Sandbox(format!("failed to spawn script worker: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                script_name,
                channel_type,
                calls: calls_tx,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ScriptError::Terminated),
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    /// Dispatch one hook with JSON-snapshot arguments.
    pub async fn invoke(&self, hook: HookKind, args: Vec<Value>) -> Result<Value, ScriptError> {
        let (reply, response) = oneshot::channel();
        self.calls
            .send(HookCall { hook, args, reply })
            .map_err(|_| ScriptError::Terminated)?;

        match tokio::time::timeout(HOOK_DEADLINE, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ScriptError::Terminated),
            Err(_) => Err(ScriptError::Timeout(hook.method())),
        }
    }
}

fn worker(
    source: String,
    config: Value,
    script_name: String,
    channel_type: String,
    logs: Arc<ScriptLogStore>,
    mut calls: mpsc::UnboundedReceiver<HookCall>,
    ready: std_mpsc::Sender<Result<(), ScriptError>>,
) {
    let host = Rc::new(HostContext::new(
        script_name.clone(),
        channel_type.clone(),
        logs,
    ));
    let mut sandbox = match Sandbox::with_host(host) {
        Ok(sandbox) => sandbox,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    if let Err(err) = sandbox.eval(&source) {
        let _ = ready.send(Err(err));
        return;
    }

    let channel = match sandbox.call_exports() {
        Ok(channel) => channel,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    if let Err(err) = run_initialize(&mut sandbox, &channel, &config) {
        let _ = ready.send(Err(err));
        return;
    }

    if ready.send(Ok(())).is_err() {
        return;
    }

    tracing::debug!(
        target: "keyrelay.script",
        script = %script_name,
        script_type = %channel_type,
        "script instance ready"
    );

    while let Some(call) = calls.blocking_recv() {
        let result = dispatch(&mut sandbox, &channel, call.hook, &call.args);
        let _ = call.reply.send(result);
    }
}

/// Call the optional `initialize(config)` member once after construction.
/// A throw here is a setup failure, not a hook failure.
fn run_initialize(
    sandbox: &mut Sandbox,
    channel: &JsObject,
    config: &Value,
) -> Result<(), ScriptError> {
    let initialize = channel
        .get(js_string!("initialize"), sandbox.context_mut())
        .map_err(|err| ScriptError::Exports(err.to_string()))?;
    let Some(callable) = initialize
        .as_object()
        .filter(|obj| obj.is_callable())
        .cloned()
    else {
        return Ok(());
    };

    let config_value = JsValue::from_json(config, sandbox.context_mut())
        .map_err(|err| ScriptError::Exports(err.to_string()))?;
    callable
        .call(&JsValue::undefined(), &[config_value], sandbox.context_mut())
        .map_err(|err| ScriptError::Exports(format!("initialize failed: {err}")))?;
    Ok(())
}

fn dispatch(
    sandbox: &mut Sandbox,
    channel: &JsObject,
    hook: HookKind,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let method_name = hook.method();
    let method = channel
        .get(JsString::from(method_name), sandbox.context_mut())
        .map_err(|err| hook_error(method_name, err.to_string()))?;
    let Some(callable) = method.as_object().filter(|obj| obj.is_callable()).cloned() else {
        return Err(ScriptError::MissingHook(method_name));
    };

    match hook {
        HookKind::BuildUpstreamUrl => {
            let result = call_with_json(sandbox, &callable, method_name, args)?;
            match result.as_string() {
                Some(url) => Ok(Value::String(url.to_std_string_escaped())),
                None => Err(hook_error(method_name, "must return a string".to_string())),
            }
        }
        HookKind::ModifyRequest => {
            // The request snapshot is mutated in place by the adapter and
            // read back afterwards; api_key and group are value copies.
            let request = JsValue::from_json(&args[0], sandbox.context_mut())
                .map_err(|err| hook_error(method_name, err.to_string()))?;
            let mut js_args = vec![request.clone()];
            for arg in &args[1..] {
                js_args.push(
                    JsValue::from_json(arg, sandbox.context_mut())
                        .map_err(|err| hook_error(method_name, err.to_string()))?,
                );
            }
            callable
                .call(&JsValue::undefined(), &js_args, sandbox.context_mut())
                .map_err(|err| hook_error(method_name, err.to_string()))?;
            request
                .to_json(sandbox.context_mut())
                .map_err(|err| hook_error(method_name, err.to_string()))
        }
        HookKind::IsStreamRequest => {
            let result = call_with_json(sandbox, &callable, method_name, args)?;
            Ok(json!(result.as_boolean().unwrap_or(false)))
        }
        HookKind::ExtractModel => {
            let result = call_with_json(sandbox, &callable, method_name, args)?;
            Ok(json!(result
                .as_string()
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_default()))
        }
        HookKind::ValidateKey => Ok(validate_key(sandbox, &callable, args)),
    }
}

fn call_with_json(
    sandbox: &mut Sandbox,
    callable: &JsObject,
    method_name: &'static str,
    args: &[Value],
) -> Result<JsValue, ScriptError> {
    let mut js_args = Vec::with_capacity(args.len());
    for arg in args {
        js_args.push(
            JsValue::from_json(arg, sandbox.context_mut())
                .map_err(|err| hook_error(method_name, err.to_string()))?,
        );
    }
    callable
        .call(&JsValue::undefined(), &js_args, sandbox.context_mut())
        .map_err(|err| hook_error(method_name, err.to_string()))
}

/// `validateKey` never surfaces a hook error: throwing, rejecting, or
/// returning a malformed record all resolve to `{valid: false, error}`.
fn validate_key(sandbox: &mut Sandbox, callable: &JsObject, args: &[Value]) -> Value {
    let result = match call_with_json(sandbox, callable, "validateKey", args) {
        Ok(result) => result,
        Err(err) => return invalid(err.to_string()),
    };

    let settled = match settle_promise(sandbox, result) {
        Ok(value) => value,
        Err(message) => return invalid(message),
    };

    let Some(record) = settled.as_object().cloned() else {
        return invalid("validateKey must return an object with 'valid' property".to_string());
    };

    let valid_value = match record.get(js_string!("valid"), sandbox.context_mut()) {
        Ok(value) => value,
        Err(err) => return invalid(err.to_string()),
    };
    if valid_value.is_undefined() {
        return invalid("validateKey must return an object with 'valid' property".to_string());
    }

    if valid_value.to_boolean() {
        return json!({ "valid": true });
    }

    let message = record
        .get(js_string!("error"), sandbox.context_mut())
        .ok()
        .filter(|value| !value.is_null_or_undefined())
        .and_then(|value| value.to_string(sandbox.context_mut()).ok())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|| "key validation failed".to_string());
    invalid(message)
}

/// Drain the job queue and read the promise's settled value, if the hook
/// returned one. Non-promise values pass through untouched.
fn settle_promise(sandbox: &mut Sandbox, value: JsValue) -> Result<JsValue, String> {
    let Some(object) = value.as_object().cloned() else {
        return Ok(value);
    };
    let Ok(promise) = JsPromise::from_object(object) else {
        return Ok(value);
    };

    sandbox.context_mut().run_jobs();
    match promise.state() {
        PromiseState::Fulfilled(settled) => Ok(settled),
        PromiseState::Rejected(reason) => Err(reason
            .to_string(sandbox.context_mut())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| "validateKey promise rejected".to_string())),
        PromiseState::Pending => Err("validateKey promise did not resolve".to_string()),
    }
}

fn invalid(message: String) -> Value {
    json!({ "valid": false, "error": message })
}

fn hook_error(hook: &'static str, message: String) -> ScriptError {
    ScriptError::Hook { hook, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyrelay_core::{ScriptMetadata, ScriptStatus};

    fn expect_err<T>(result: Result<T, ScriptError>) -> ScriptError {
        match result {
            Ok(_) => panic!("expected Err, got Ok"),
            Err(err) => err,
        }
    }

    const ADAPTER: &str = r#"
var configured = null;

function exports() {
    return {
        metadata: {
            name: "openai_compatible",
            version: "1.0.0",
            description: "OpenAI-compatible upstreams",
            author: "ops",
            channel_type: "openai_compatible"
        },
        initialize: function(config) {
            configured = config;
        },
        buildUpstreamURL: function(originalUrl, group) {
            return utils.joinURL(group.upstreams[0].url, originalUrl);
        },
        modifyRequest: function(request, apiKey, group) {
            request.headers["Authorization"] = "Bearer " + apiKey;
            if (configured && configured.org) {
                request.headers["X-Org"] = configured.org;
            }
        },
        isStreamRequest: function(context) {
            var body = utils.parseJSON(context.body_bytes);
            return !!(body && body.stream === true);
        },
        extractModel: function(context) {
            var body = utils.parseJSON(context.body_bytes);
            return body && body.model ? body.model : "";
        },
        validateKey: function(key, config) {
            if (key === "good") {
                return { valid: true };
            }
            return Promise.resolve({ valid: false, error: "key rejected upstream" });
        }
    };
}
"#;

    fn script(source: &str) -> ChannelScript {
        let now = Utc::now();
        let mut config = serde_json::Map::new();
        config.insert("org".to_string(), json!("acme"));
        ChannelScript {
            id: 1,
            name: "openai_compatible".to_string(),
            display_name: "OpenAI Compatible".to_string(),
            description: String::new(),
            author: "ops".to_string(),
            version: "1.0.0".to_string(),
            channel_type: "openai_compatible".to_string(),
            script: source.to_string(),
            metadata: ScriptMetadata {
                name: "openai_compatible".to_string(),
                version: "1.0.0".to_string(),
                description: "test".to_string(),
                author: "ops".to_string(),
                channel_type: "openai_compatible".to_string(),
                ..Default::default()
            },
            config,
            status: ScriptStatus::Enabled,
            error_msg: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn group_json() -> Value {
        json!({
            "id": 1,
            "name": "g",
            "channel_type": "openai_compatible",
            "upstreams": [{"url": "https://api.example.com", "weight": 1}],
            "config": {}
        })
    }

    fn spawn_adapter(source: &str) -> Arc<ScriptInstance> {
        Arc::new(ScriptInstance::spawn(&script(source), Arc::new(ScriptLogStore::new())).unwrap())
    }

    #[tokio::test]
    async fn build_upstream_url_returns_absolute_url() {
        let instance = spawn_adapter(ADAPTER);
        let result = instance
            .invoke(
                HookKind::BuildUpstreamUrl,
                vec![json!("/v1/chat/completions"), group_json()],
            )
            .await
            .unwrap();
        assert_eq!(result, json!("https://api.example.com/v1/chat/completions"));
    }

    #[tokio::test]
    async fn modify_request_rewrites_headers_and_sees_initialize_config() {
        let instance = spawn_adapter(ADAPTER);
        let request = json!({
            "method": "POST",
            "url": "/v1/chat/completions",
            "headers": {"Authorization": "Bearer proxy-key"},
            "query": {}
        });
        let result = instance
            .invoke(
                HookKind::ModifyRequest,
                vec![request, json!("pool-key"), group_json()],
            )
            .await
            .unwrap();

        assert_eq!(result["headers"]["Authorization"], json!("Bearer pool-key"));
        assert_eq!(result["headers"]["X-Org"], json!("acme"));
    }

    #[tokio::test]
    async fn stream_detection_via_body() {
        let instance = spawn_adapter(ADAPTER);
        let context = |stream: bool| {
            json!({
                "request": {"method": "POST", "url": "/v1/chat/completions", "headers": {}, "query": {}},
                "body_bytes": format!("{{\"model\":\"m\",\"stream\":{stream}}}"),
                "original_url": "/v1/chat/completions"
            })
        };

        let streaming = instance
            .invoke(HookKind::IsStreamRequest, vec![context(true)])
            .await
            .unwrap();
        assert_eq!(streaming, json!(true));

        let plain = instance
            .invoke(HookKind::IsStreamRequest, vec![context(false)])
            .await
            .unwrap();
        assert_eq!(plain, json!(false));
    }

    #[tokio::test]
    async fn extract_model_reads_body() {
        let instance = spawn_adapter(ADAPTER);
        let context = json!({
            "request": {"method": "POST", "url": "/v1/chat/completions", "headers": {}, "query": {}},
            "body_bytes": "{\"model\":\"m\",\"stream\":false}",
            "original_url": "/v1/chat/completions"
        });
        let model = instance
            .invoke(HookKind::ExtractModel, vec![context])
            .await
            .unwrap();
        assert_eq!(model, json!("m"));
    }

    #[tokio::test]
    async fn validate_key_resolves_promises() {
        let instance = spawn_adapter(ADAPTER);

        let ok = instance
            .invoke(HookKind::ValidateKey, vec![json!("good"), json!({})])
            .await
            .unwrap();
        assert_eq!(ok["valid"], json!(true));

        let rejected = instance
            .invoke(HookKind::ValidateKey, vec![json!("bad"), json!({})])
            .await
            .unwrap();
        assert_eq!(rejected["valid"], json!(false));
        assert_eq!(rejected["error"], json!("key rejected upstream"));
    }

    #[tokio::test]
    async fn validate_key_surfaces_ssrf_refusal() {
        let source = r#"
function exports() {
    return {
        metadata: {name: "m", version: "1", description: "d", author: "a", channel_type: "t"},
        buildUpstreamURL: function(u, g) { return "https://api.example.com"; },
        modifyRequest: function(r, k, g) {},
        isStreamRequest: function(c) { return false; },
        extractModel: function(c) { return ""; },
        validateKey: function(key, config) {
            try {
                utils.httpRequest({ method: "GET", url: "http://127.0.0.1:9000/" });
                return { valid: true };
            } catch (e) {
                return { valid: false, error: e.message };
            }
        }
    };
}
"#;
        let instance = spawn_adapter(source);
        let record = instance
            .invoke(HookKind::ValidateKey, vec![json!("k"), json!({})])
            .await
            .unwrap();
        assert_eq!(record["valid"], json!(false));
        assert!(record["error"]
            .as_str()
            .unwrap()
            .contains("access to private networks is not allowed"));
    }

    #[tokio::test]
    async fn validate_key_throw_becomes_invalid_record() {
        let source = ADAPTER.replace(
            "if (key === \"good\") {",
            "if (false) { throw new Error('unreachable'); } else if (key === \"boom\") { throw new Error('exploded'); } else if (key === \"good\") {",
        );
        let instance = spawn_adapter(&source);
        let record = instance
            .invoke(HookKind::ValidateKey, vec![json!("boom"), json!({})])
            .await
            .unwrap();
        assert_eq!(record["valid"], json!(false));
        assert!(record["error"].as_str().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn non_string_upstream_url_is_a_hook_error() {
        let source = ADAPTER.replace(
            "return utils.joinURL(group.upstreams[0].url, originalUrl);",
            "return 42;",
        );
        let instance = spawn_adapter(&source);
        let err = instance
            .invoke(
                HookKind::BuildUpstreamUrl,
                vec![json!("/v1/models"), group_json()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Hook { .. }));
    }

    #[tokio::test]
    async fn missing_hook_is_reported() {
        let source = r#"
function exports() {
    return {
        metadata: {name: "m", version: "1", description: "d", author: "a", channel_type: "t"},
        buildUpstreamURL: function(u, g) { return "https://api.example.com" + u; }
    };
}
"#;
        let instance = spawn_adapter(source);
        let err = instance
            .invoke(HookKind::ValidateKey, vec![json!("k"), json!({})])
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::MissingHook("validateKey")));
    }

    #[test]
    fn spawn_reports_eval_failures() {
        let bad = script("throw new Error('top-level boom');");
        let err = expect_err(ScriptInstance::spawn(&bad, Arc::new(ScriptLogStore::new())));
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn spawn_reports_exports_failures() {
        let bad = script("function exports() { throw new Error('no channel'); }");
        let err = expect_err(ScriptInstance::spawn(&bad, Arc::new(ScriptLogStore::new())));
        assert!(matches!(err, ScriptError::Exports(_)));
    }
}
