//! Host functions exposed to adapter code as `utils` and `console`.
//!
//! Each sandbox runs on a thread that owns exactly one VM, so the host
//! context is installed per thread before any user source executes. Values
//! cross the boundary as JSON snapshots; the only suspension point is the
//! synchronous `httpRequest`, which blocks the owning thread.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue};
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

use super::headers::is_allowed_header;
use super::url_guard::validate_url;
use crate::logs::ScriptLogStore;

/// User agent attached to every sandboxed outbound request.
pub const SCRIPT_USER_AGENT: &str = "GPT-Load-Script/1.0";

const RATE_WINDOW: Duration = Duration::from_secs(60);
const MAX_HTTP_REQUESTS_PER_WINDOW: u32 = 10;
const MAX_LOG_RECORDS_PER_WINDOW: u32 = 50;
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const MAX_RESPONSE_BODY_BYTES: u64 = 5 * 1024 * 1024;
const MAX_BASE64_INPUT_BYTES: usize = 1024 * 1024;
const MAX_LOG_MESSAGE_CHARS: usize = 1000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

thread_local! {
    static HOST: RefCell<Option<Rc<HostContext>>> = const { RefCell::new(None) };
}

/// Install the host context for the current thread. Must happen before any
/// adapter source runs on this thread.
pub(crate) fn install(host: Rc<HostContext>) {
    HOST.with(|slot| *slot.borrow_mut() = Some(host));
}

fn current_host() -> JsResult<Rc<HostContext>> {
    HOST.with(|slot| slot.borrow().clone()).ok_or_else(|| {
        JsNativeError::error()
            .with_message("sandbox host is not available")
            .into()
    })
}

#[derive(Default)]
struct RateWindows {
    http_request_count: u32,
    last_request_time: Option<Instant>,
    log_count: u32,
    last_log_time: Option<Instant>,
}

/// Per-instance state backing the host surface: identity for log fields,
/// sliding-window counters, the outbound HTTP client, and the log buffer.
pub struct HostContext {
    script_name: String,
    channel_type: String,
    limits: Mutex<RateWindows>,
    http: OnceLock<reqwest::blocking::Client>,
    logs: Arc<ScriptLogStore>,
}

impl HostContext {
    pub fn new(
        script_name: impl Into<String>,
        channel_type: impl Into<String>,
        logs: Arc<ScriptLogStore>,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            channel_type: channel_type.into(),
            limits: Mutex::new(RateWindows::default()),
            http: OnceLock::new(),
            logs,
        }
    }

    /// Count an outbound request against the rolling window.
    ///
    /// The window is anchored at the first event and resets after a quiet
    /// minute; the 11th request inside one window is refused.
    pub fn try_acquire_http(&self) -> Result<(), String> {
        let mut windows = self.limits.lock();
        let now = Instant::now();
        match windows.last_request_time {
            Some(last) if now.duration_since(last) < RATE_WINDOW => {
                windows.http_request_count += 1;
                if windows.http_request_count > MAX_HTTP_REQUESTS_PER_WINDOW {
                    return Err("rate limit exceeded: max 10 requests per minute".to_string());
                }
            }
            _ => {
                windows.http_request_count = 1;
                windows.last_request_time = Some(now);
            }
        }
        Ok(())
    }

    /// Count a log record; false means the record is dropped silently.
    pub fn try_acquire_log(&self) -> bool {
        let mut windows = self.limits.lock();
        let now = Instant::now();
        match windows.last_log_time {
            Some(last) if now.duration_since(last) < RATE_WINDOW => {
                windows.log_count += 1;
                windows.log_count <= MAX_LOG_RECORDS_PER_WINDOW
            }
            _ => {
                windows.log_count = 1;
                windows.last_log_time = Some(now);
                true
            }
        }
    }

    fn http_client(&self) -> Result<reqwest::blocking::Client, String> {
        if let Some(client) = self.http.get() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(SCRIPT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|err| format!("failed to build http client: {err}"))?;
        let _ = self.http.set(client.clone());
        Ok(client)
    }
}

fn host_error(message: impl Into<String>) -> boa_engine::JsError {
    JsNativeError::error().with_message(message.into()).into()
}

fn string_arg(value: &JsValue, context: &mut Context) -> JsResult<String> {
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// `utils.httpRequest({method, url, headers?, body?}) -> {status_code, headers, body}`
pub(crate) fn http_request(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(request) = args.first().and_then(JsValue::as_object) else {
        return Err(JsNativeError::typ()
            .with_message("httpRequest requires a request object")
            .into());
    };

    let host = current_host()?;
    host.try_acquire_http().map_err(host_error)?;

    let method_value = request.get(js_string!("method"), context)?;
    let method = if method_value.is_undefined() {
        "GET".to_string()
    } else {
        string_arg(&method_value, context)?
    };
    let url = string_arg(&request.get(js_string!("url"), context)?, context)?;

    let body_value = request.get(js_string!("body"), context)?;
    let body = if body_value.is_null_or_undefined() {
        String::new()
    } else {
        string_arg(&body_value, context)?
    };

    validate_url(&url).map_err(host_error)?;
    if body.len() > MAX_REQUEST_BODY_BYTES {
        return Err(host_error("request body too large: max 1MB allowed"));
    }

    // Headers come across as a JSON snapshot; disallowed names and malformed
    // values are skipped silently.
    let mut header_pairs: Vec<(String, String)> = Vec::new();
    let headers_value = request.get(js_string!("headers"), context)?;
    if !headers_value.is_null_or_undefined() {
        if let Ok(Value::Object(map)) = headers_value.to_json(context) {
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                if is_allowed_header(&name, &value) {
                    header_pairs.push((name, value));
                }
            }
        }
    }

    let client = host.http_client().map_err(host_error)?;
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|err| host_error(format!("invalid request method: {err}")))?;

    let mut builder = client.request(method, &url);
    for (name, value) in &header_pairs {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    let response = builder
        .send()
        .map_err(|err| host_error(format!("http request failed: {err}")))?;

    let status = response.status().as_u16();
    let mut response_headers = serde_json::Map::new();
    for name in response.headers().keys() {
        if let Some(value) = response.headers().get(name) {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
    }

    // Response body is capped; anything past the limit is truncated silently.
    let mut buf = Vec::new();
    response
        .take(MAX_RESPONSE_BODY_BYTES)
        .read_to_end(&mut buf)
        .map_err(|err| host_error(format!("failed to read response body: {err}")))?;

    let result = json!({
        "status_code": status,
        "headers": Value::Object(response_headers),
        "body": String::from_utf8_lossy(&buf).into_owned(),
    });
    JsValue::from_json(&result, context)
}

/// `utils.parseJSON(s) -> value | null`; never throws.
pub(crate) fn parse_json(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(arg) = args.first() else {
        return Ok(JsValue::null());
    };
    let text = string_arg(arg, context)?;
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Ok(JsValue::from_json(&value, context).unwrap_or(JsValue::null())),
        Err(_) => Ok(JsValue::null()),
    }
}

/// `utils.base64Encode(s) -> string`
pub(crate) fn base64_encode(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(arg) = args.first() else {
        return Ok(js_string!("").into());
    };
    let data = string_arg(arg, context)?;
    if data.len() > MAX_BASE64_INPUT_BYTES {
        return Err(host_error("base64 input too large: max 1MB allowed"));
    }
    Ok(boa_engine::JsString::from(BASE64.encode(data.as_bytes())).into())
}

/// `utils.base64Decode(s) -> string`; invalid input raises into the adapter.
pub(crate) fn base64_decode(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(arg) = args.first() else {
        return Ok(js_string!("").into());
    };
    let data = string_arg(arg, context)?;
    if data.len() > MAX_BASE64_INPUT_BYTES {
        return Err(host_error("base64 input too large: max 1MB allowed"));
    }
    let decoded = BASE64
        .decode(data.as_bytes())
        .map_err(|err| host_error(format!("invalid base64 data: {err}")))?;
    Ok(boa_engine::JsString::from(String::from_utf8_lossy(&decoded).into_owned()).into())
}

/// `utils.parseURL(s) -> {protocol, host, pathname, search, hash} | null`
pub(crate) fn parse_url(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(arg) = args.first() else {
        return Ok(JsValue::null());
    };
    let raw = string_arg(arg, context)?;
    let Ok(parsed) = Url::parse(&raw) else {
        return Ok(JsValue::null());
    };

    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    };
    let result = json!({
        "protocol": parsed.scheme(),
        "host": host,
        "pathname": parsed.path(),
        "search": parsed.query().unwrap_or(""),
        "hash": parsed.fragment().unwrap_or(""),
    });
    JsValue::from_json(&result, context)
}

/// `utils.joinURL(base, path) -> string` ("" on error).
pub(crate) fn join_url(
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    if args.len() < 2 {
        return Ok(js_string!("").into());
    }
    let base = string_arg(&args[0], context)?;
    let path = string_arg(&args[1], context)?;
    Ok(boa_engine::JsString::from(join_url_path(&base, &path).unwrap_or_default()).into())
}

/// Append a path segment to a base URL, preserving the base's existing path.
pub fn join_url_path(base: &str, path: &str) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    let joined = {
        let trimmed_base = url.path().trim_end_matches('/');
        let trimmed_path = path.trim_start_matches('/');
        if trimmed_path.is_empty() {
            trimmed_base.to_string()
        } else {
            format!("{trimmed_base}/{trimmed_path}")
        }
    };
    url.set_path(&joined);
    Some(url.to_string())
}

pub(crate) fn log_debug(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let _ = this;
    emit_log("debug", args, ctx)
}

pub(crate) fn log_info(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let _ = this;
    emit_log("info", args, ctx)
}

pub(crate) fn log_warn(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let _ = this;
    emit_log("warn", args, ctx)
}

pub(crate) fn log_error(this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let _ = this;
    emit_log("error", args, ctx)
}

fn emit_log(level: &'static str, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(first) = args.first() else {
        return Ok(JsValue::undefined());
    };
    let host = current_host()?;
    if !host.try_acquire_log() {
        return Ok(JsValue::undefined());
    }

    let mut message = string_arg(first, context)?;
    if message.len() > MAX_LOG_MESSAGE_CHARS {
        let mut cut = MAX_LOG_MESSAGE_CHARS;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("... (truncated)");
    }

    match level {
        "debug" => tracing::debug!(
            target: "keyrelay.script",
            script = %host.script_name,
            script_type = %host.channel_type,
            "{message}"
        ),
        "warn" => tracing::warn!(
            target: "keyrelay.script",
            script = %host.script_name,
            script_type = %host.channel_type,
            "{message}"
        ),
        "error" => tracing::error!(
            target: "keyrelay.script",
            script = %host.script_name,
            script_type = %host.channel_type,
            "{message}"
        ),
        _ => tracing::info!(
            target: "keyrelay.script",
            script = %host.script_name,
            script_type = %host.channel_type,
            "{message}"
        ),
    }

    host.logs.push(&host.script_name, level, &message);
    Ok(JsValue::undefined())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use keyrelay_core::ScriptLogSink;

    fn runtime_sandbox(logs: Arc<ScriptLogStore>) -> Sandbox {
        let host = Rc::new(HostContext::new("test_script", "test_type", logs));
        Sandbox::with_host(host).unwrap()
    }

    #[test]
    fn http_rate_window_allows_ten_then_refuses() {
        let host = HostContext::new("s", "t", Arc::new(ScriptLogStore::new()));
        for _ in 0..10 {
            assert!(host.try_acquire_http().is_ok());
        }
        let err = host.try_acquire_http().unwrap_err();
        assert_eq!(err, "rate limit exceeded: max 10 requests per minute");
    }

    #[test]
    fn log_rate_window_allows_fifty_then_drops() {
        let host = HostContext::new("s", "t", Arc::new(ScriptLogStore::new()));
        for _ in 0..50 {
            assert!(host.try_acquire_log());
        }
        assert!(!host.try_acquire_log());
    }

    #[test]
    fn parse_json_returns_null_on_failure() {
        let mut sandbox = runtime_sandbox(Arc::new(ScriptLogStore::new()));
        let value = sandbox.eval("utils.parseJSON('not json')").unwrap();
        assert!(value.is_null());

        let value = sandbox.eval("utils.parseJSON('{\"model\":\"m\"}').model").unwrap();
        let model = value
            .to_string(sandbox.context_mut())
            .unwrap()
            .to_std_string_escaped();
        assert_eq!(model, "m");
    }

    #[test]
    fn base64_round_trips_and_rejects_garbage() {
        let mut sandbox = runtime_sandbox(Arc::new(ScriptLogStore::new()));
        let value = sandbox
            .eval("utils.base64Decode(utils.base64Encode('hello'))")
            .unwrap();
        let text = value
            .to_string(sandbox.context_mut())
            .unwrap()
            .to_std_string_escaped();
        assert_eq!(text, "hello");

        let err = sandbox.eval("utils.base64Decode('%%%')").unwrap_err();
        assert!(err.to_string().contains("invalid base64 data"));
    }

    #[test]
    fn parse_url_exposes_components() {
        let mut sandbox = runtime_sandbox(Arc::new(ScriptLogStore::new()));
        let value = sandbox
            .eval("utils.parseURL('https://api.example.com:8443/v1/models?x=1#frag').host")
            .unwrap();
        let host = value
            .to_string(sandbox.context_mut())
            .unwrap()
            .to_std_string_escaped();
        assert_eq!(host, "api.example.com:8443");

        let value = sandbox.eval("utils.parseURL('::not a url::')").unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn join_url_appends_path_segments() {
        assert_eq!(
            join_url_path("https://api.example.com", "/v1/chat/completions").as_deref(),
            Some("https://api.example.com/v1/chat/completions")
        );
        assert_eq!(
            join_url_path("https://api.example.com/v1/", "models").as_deref(),
            Some("https://api.example.com/v1/models")
        );
        assert_eq!(join_url_path("not a base", "x"), None);
    }

    #[test]
    fn http_request_refuses_private_targets() {
        let mut sandbox = runtime_sandbox(Arc::new(ScriptLogStore::new()));
        let err = sandbox
            .eval("utils.httpRequest({method: 'GET', url: 'http://127.0.0.1:9000/'})")
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("access to private networks is not allowed"));
    }

    #[test]
    fn logs_reach_store_until_window_is_spent() {
        let store = Arc::new(ScriptLogStore::new());
        let mut sandbox = runtime_sandbox(Arc::clone(&store));
        sandbox
            .eval("for (var i = 0; i < 60; i++) { utils.log.info('line ' + i); }")
            .unwrap();

        let records = store.records("test_script");
        assert_eq!(records.len(), 50);
        assert_eq!(records[0].message, "line 0");
        assert_eq!(records[49].message, "line 49");
    }

    #[test]
    fn long_log_messages_are_truncated() {
        let store = Arc::new(ScriptLogStore::new());
        let mut sandbox = runtime_sandbox(Arc::clone(&store));
        sandbox
            .eval("utils.log.info(new Array(1200).join('x'))")
            .unwrap();

        let records = store.records("test_script");
        assert_eq!(records.len(), 1);
        assert!(records[0].message.ends_with("... (truncated)"));
        assert_eq!(records[0].message.len(), 1000 + "... (truncated)".len());
    }
}
