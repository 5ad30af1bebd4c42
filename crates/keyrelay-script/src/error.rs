use thiserror::Error;

/// Errors raised by the script runtime and hook dispatch.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// Engine construction failed.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Top-level evaluation of the adapter source threw.
    #[error("script execution failed: {0}")]
    Eval(String),

    /// The script does not define a callable `exports`.
    #[error("script must export a function")]
    MissingExports,

    /// `exports()` threw or returned something other than an object.
    #[error("failed to create channel instance: {0}")]
    Exports(String),

    /// The channel object does not expose the named hook as a callable.
    #[error("{0} method not implemented in script")]
    MissingHook(&'static str),

    /// The hook threw or returned a value outside its contract.
    #[error("{hook} failed: {message}")]
    Hook {
        hook: &'static str,
        message: String,
    },

    /// The host-side deadline for a hook invocation elapsed.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The worker thread owning the VM is gone.
    #[error("script runtime terminated")]
    Terminated,
}
