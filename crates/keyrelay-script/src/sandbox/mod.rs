//! Engine construction: stripped globals, runtime limits, and the curated
//! `utils` / `console` host surface.

pub mod headers;
pub mod host;
pub mod url_guard;

use std::rc::Rc;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsObject, JsString, JsValue, NativeFunction, Source};

use crate::error::ScriptError;
pub use host::HostContext;

/// Maximum call stack depth for adapter code.
const MAX_CALL_STACK_DEPTH: usize = 100;

/// Hard ceiling on loop iterations, a backstop for hostile loops that slip
/// past the textual denylist.
const LOOP_ITERATION_LIMIT: u64 = 10_000_000;

/// Globals replaced with `undefined` before any user source executes.
const STRIPPED_GLOBALS: &[&str] = &[
    "eval",
    "Function",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "require",
    "process",
    "global",
    "globalThis",
];

/// One embedded engine with the adapter environment applied.
///
/// A bare sandbox (no `utils`) is used for validation; the runtime variant
/// installs the host surface bound to a [`HostContext`]. Either way the
/// engine is single-threaded and owned by exactly one caller.
pub struct Sandbox {
    context: Context,
}

impl Sandbox {
    /// Throwaway sandbox for the validator: stripped globals and limits, no
    /// host utilities.
    pub fn bare() -> Result<Self, ScriptError> {
        let mut context = Context::default();
        apply_limits(&mut context);
        strip_globals(&mut context)?;
        Ok(Self { context })
    }

    /// Runtime sandbox bound to a host context. The context is installed for
    /// the calling thread; one VM per thread is an invariant of the runtime.
    pub fn with_host(host: Rc<HostContext>) -> Result<Self, ScriptError> {
        let mut sandbox = Self::bare()?;
        host::install(host);
        sandbox.install_utils()?;
        Ok(sandbox)
    }

    /// Execute source at top level.
    pub fn eval(&mut self, source: &str) -> Result<JsValue, ScriptError> {
        self.context
            .eval(Source::from_bytes(source))
            .map_err(|err| ScriptError::Eval(err.to_string()))
    }

    /// Read a global binding.
    pub fn global_get(&mut self, name: &str) -> Result<JsValue, ScriptError> {
        let global = self.context.global_object();
        global
            .get(JsString::from(name), &mut self.context)
            .map_err(|err| ScriptError::Sandbox(err.to_string()))
    }

    /// Invoke the script's `exports()` and return the channel object.
    pub fn call_exports(&mut self) -> Result<JsObject, ScriptError> {
        let exports = self.global_get("exports")?;
        let callable = exports
            .as_object()
            .filter(|obj| obj.is_callable())
            .cloned()
            .ok_or(ScriptError::MissingExports)?;

        let channel = callable
            .call(&JsValue::undefined(), &[], &mut self.context)
            .map_err(|err| ScriptError::Exports(err.to_string()))?;

        channel
            .as_object()
            .cloned()
            .ok_or_else(|| ScriptError::Exports("exports() must return an object".to_string()))
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    fn install_utils(&mut self) -> Result<(), ScriptError> {
        let context = &mut self.context;

        let log = ObjectInitializer::new(context)
            .function(NativeFunction::from_fn_ptr(host::log_debug), js_string!("debug"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_info), js_string!("info"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_warn), js_string!("warn"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_error), js_string!("error"), 1)
            .build();

        let utils = ObjectInitializer::new(context)
            .function(
                NativeFunction::from_fn_ptr(host::http_request),
                js_string!("httpRequest"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host::parse_json),
                js_string!("parseJSON"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host::base64_encode),
                js_string!("base64Encode"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host::base64_decode),
                js_string!("base64Decode"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host::parse_url),
                js_string!("parseURL"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(host::join_url),
                js_string!("joinURL"),
                2,
            )
            .property(js_string!("log"), log, Attribute::empty())
            .build();

        // console aliases onto the same rate-limited logger.
        let console = ObjectInitializer::new(context)
            .function(NativeFunction::from_fn_ptr(host::log_info), js_string!("log"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_error), js_string!("error"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_warn), js_string!("warn"), 1)
            .function(NativeFunction::from_fn_ptr(host::log_debug), js_string!("debug"), 1)
            .build();

        context
            .register_global_property(js_string!("utils"), utils, Attribute::empty())
            .map_err(|err| ScriptError::Sandbox(err.to_string()))?;
        context
            .register_global_property(js_string!("console"), console, Attribute::empty())
            .map_err(|err| ScriptError::Sandbox(err.to_string()))?;
        Ok(())
    }
}

fn apply_limits(context: &mut Context) {
    let limits = context.runtime_limits_mut();
    limits.set_recursion_limit(MAX_CALL_STACK_DEPTH);
    limits.set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
}

fn strip_globals(context: &mut Context) -> Result<(), ScriptError> {
    let global = context.global_object();
    for name in STRIPPED_GLOBALS {
        global
            .set(JsString::from(*name), JsValue::undefined(), false, context)
            .map_err(|err| ScriptError::Sandbox(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripped_globals_are_undefined() {
        let mut sandbox = Sandbox::bare().unwrap();
        let value = sandbox.eval("typeof eval").unwrap();
        let type_name = value
            .to_string(sandbox.context_mut())
            .unwrap()
            .to_std_string_escaped();
        assert_eq!(type_name, "undefined");
    }

    #[test]
    fn recursion_is_capped() {
        let mut sandbox = Sandbox::bare().unwrap();
        let result = sandbox.eval("function f() { return f(); } f();");
        assert!(result.is_err());
    }

    #[test]
    fn exports_round_trip() {
        let mut sandbox = Sandbox::bare().unwrap();
        sandbox
            .eval("function exports() { return { answer: 42 }; }")
            .unwrap();
        let channel = sandbox.call_exports().unwrap();
        let answer = channel
            .get(js_string!("answer"), sandbox.context_mut())
            .unwrap();
        assert_eq!(answer.as_number(), Some(42.0));
    }

    #[test]
    fn missing_exports_is_reported() {
        let mut sandbox = Sandbox::bare().unwrap();
        sandbox.eval("var nothing = 1;").unwrap();
        assert!(matches!(
            sandbox.call_exports(),
            Err(ScriptError::MissingExports)
        ));
    }
}
