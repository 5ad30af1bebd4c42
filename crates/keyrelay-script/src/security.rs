//! Static and structural gate for adapter scripts.
//!
//! Every script passes this gate before it is compiled into a live instance,
//! and again on every disabled-to-enabled transition. Checks run in a fixed
//! order and the first failure aborts; rejections carry a human-readable
//! reason that surfaces to the catalogue API verbatim.

use regex::Regex;

use keyrelay_core::{ScriptMetadata, ScriptValidator, TestReport, ValidationError};

use crate::sandbox::Sandbox;
use boa_engine::JsString;

/// Maximum script size in bytes.
const MAX_SCRIPT_SIZE: usize = 1024 * 1024;
const MAX_LINES: usize = 10_000;
const MAX_NESTING: i32 = 20;
const MAX_FUNCTIONS: usize = 100;

/// Hooks the channel object must expose.
const REQUIRED_METHODS: &[&str] = &[
    "buildUpstreamURL",
    "modifyRequest",
    "isStreamRequest",
    "extractModel",
    "validateKey",
];

/// Metadata fields the channel object must declare.
const REQUIRED_METADATA_FIELDS: &[&str] =
    &["name", "version", "description", "author", "channel_type"];

/// Textual patterns rejected before the source is ever parsed.
const FORBIDDEN_PATTERNS: &[&str] = &[
    // Dynamic code construction and timers
    r"eval\s*\(",
    r"Function\s*\(",
    r"setTimeout\s*\(",
    r"setInterval\s*\(",
    r"setImmediate\s*\(",
    r"require\s*\(",
    r"import\s+.*from",
    r"import\s*\(",
    // Environment access
    r"process\.",
    r"global\.",
    r"globalThis\.",
    r"window\.",
    r"document\.",
    r"location\.",
    r"navigator\.",
    // Transports the sandbox does not broker
    r"XMLHttpRequest",
    r"fetch\s*\(",
    r"WebSocket",
    r"Worker\s*\(",
    r"SharedWorker\s*\(",
    r"ServiceWorker",
    // Persistence
    r"localStorage",
    r"sessionStorage",
    r"indexedDB",
    // Introspection escape hatches
    r"crypto\.subtle",
    r"performance\.",
    r"console\.trace",
    r"console\.profile",
    r"debugger",
    r"__proto__",
    r"constructor\.constructor",
    r"\.call\s*\(\s*null",
    r"\.apply\s*\(\s*null",
    r"\.bind\s*\(\s*null",
    // Host-platform identifiers
    r"fs\.",
    r"path\.",
    r"os\.",
    r"child_process",
    r"cluster\.",
    r"net\.",
    r"http\.",
    r"https\.",
    r"url\.",
    r"querystring\.",
    // Code injection shapes
    r"new\s+Function",
    r"\.constructor\s*\(",
    r"String\.fromCharCode",
    r"String\.fromCodePoint",
    r"unescape\s*\(",
    r"decodeURI\s*\(",
    r"decodeURIComponent\s*\(",
    // Denial-of-service shapes
    r"while\s*\(\s*true\s*\)",
    r"for\s*\(\s*;\s*;\s*\)",
    r"setInterval\s*\(\s*.*,\s*0\s*\)",
];

/// Security validator for channel adapter scripts.
///
/// Stateless apart from the compiled pattern set; validating the same source
/// twice returns the same result.
pub struct ScriptSecurityValidator {
    patterns: Vec<(&'static str, Regex)>,
}

impl ScriptSecurityValidator {
    pub fn new() -> Self {
        let patterns = FORBIDDEN_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok().map(|re| (*pattern, re)))
            .collect();
        Self { patterns }
    }

    fn check_size(&self, source: &str) -> Result<(), ValidationError> {
        if source.len() > MAX_SCRIPT_SIZE {
            return Err(ValidationError::new(format!(
                "script too large: {} bytes (max {} bytes)",
                source.len(),
                MAX_SCRIPT_SIZE
            )));
        }
        Ok(())
    }

    fn check_patterns(&self, source: &str) -> Result<(), ValidationError> {
        for (pattern, regex) in &self.patterns {
            if regex.is_match(source) {
                return Err(ValidationError::new(format!(
                    "script contains forbidden pattern: {pattern}"
                )));
            }
        }
        Ok(())
    }

    fn check_complexity(&self, source: &str) -> Result<(), ValidationError> {
        let lines: Vec<&str> = source.lines().collect();
        if lines.len() > MAX_LINES {
            return Err(ValidationError::new(format!(
                "script too complex: {} lines (max {MAX_LINES})",
                lines.len()
            )));
        }

        let mut current_nesting = 0i32;
        let mut max_nesting = 0i32;
        for line in &lines {
            let opens = line.matches('{').count() as i32;
            let closes = line.matches('}').count() as i32;
            current_nesting += opens - closes;
            max_nesting = max_nesting.max(current_nesting);
            if max_nesting > MAX_NESTING {
                return Err(ValidationError::new(format!(
                    "script too complex: excessive nesting depth ({max_nesting} levels)"
                )));
            }
        }

        let function_pattern = Regex::new(r"function\s+\w+").expect("function pattern");
        let function_count = function_pattern.find_iter(source).count();
        if function_count > MAX_FUNCTIONS {
            return Err(ValidationError::new(format!(
                "script too complex: too many functions ({function_count}, max {MAX_FUNCTIONS})"
            )));
        }

        Ok(())
    }

    /// Parse and execute once in a throwaway sandbox, then check the
    /// structural contract on the object `exports()` returns.
    fn check_structure(&self, source: &str) -> Result<(), ValidationError> {
        let mut sandbox = Sandbox::bare()
            .map_err(|err| ValidationError::new(format!("failed to create sandbox: {err}")))?;

        sandbox.eval(source).map_err(|err| {
            let message = match err {
                crate::error::ScriptError::Eval(inner) => inner,
                other => other.to_string(),
            };
            ValidationError::new(format!("syntax error: {message}"))
        })?;

        let exports = sandbox
            .global_get("exports")
            .map_err(|err| ValidationError::new(err.to_string()))?;
        if exports.is_undefined() {
            return Err(ValidationError::new(
                "script must define an 'exports' function",
            ));
        }
        let callable = exports
            .as_object()
            .filter(|obj| obj.is_callable())
            .cloned()
            .ok_or_else(|| ValidationError::new("'exports' must be a function"))?;

        let channel = callable
            .call(
                &boa_engine::JsValue::undefined(),
                &[],
                sandbox.context_mut(),
            )
            .map_err(|err| ValidationError::new(format!("exports() function failed: {err}")))?;
        let channel = channel
            .as_object()
            .cloned()
            .ok_or_else(|| ValidationError::new("exports() must return an object"))?;

        for method in REQUIRED_METHODS {
            let value = channel
                .get(JsString::from(*method), sandbox.context_mut())
                .map_err(|err| ValidationError::new(err.to_string()))?;
            if value.is_undefined() {
                return Err(ValidationError::new(format!(
                    "missing required method: {method}"
                )));
            }
            if !value.as_object().is_some_and(|obj| obj.is_callable()) {
                return Err(ValidationError::new(format!("'{method}' must be a function")));
            }
        }

        let metadata = channel
            .get(JsString::from("metadata"), sandbox.context_mut())
            .map_err(|err| ValidationError::new(err.to_string()))?;
        if metadata.is_undefined() {
            return Err(ValidationError::new("missing required 'metadata' property"));
        }
        let metadata = metadata
            .as_object()
            .cloned()
            .ok_or_else(|| ValidationError::new("'metadata' must be an object"))?;

        for field in REQUIRED_METADATA_FIELDS {
            let value = metadata
                .get(JsString::from(*field), sandbox.context_mut())
                .map_err(|err| ValidationError::new(err.to_string()))?;
            if value.is_undefined() {
                return Err(ValidationError::new(format!(
                    "missing required metadata field: {field}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for ScriptSecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptValidator for ScriptSecurityValidator {
    fn validate(&self, source: &str, _metadata: &ScriptMetadata) -> Result<(), ValidationError> {
        self.check_size(source)?;
        self.check_patterns(source)?;
        self.check_complexity(source)?;
        self.check_structure(source)?;
        Ok(())
    }

    fn smoke_test(&self, source: &str, metadata: &ScriptMetadata) -> TestReport {
        if let Err(err) = self.validate(source, metadata) {
            return TestReport {
                valid: false,
                message: None,
                error: Some(err.to_string()),
                runtime: None,
            };
        }

        TestReport {
            valid: true,
            message: Some("Script test completed successfully".to_string()),
            error: None,
            runtime: Some("JavaScript runtime created successfully".to_string()),
        }
    }
}
