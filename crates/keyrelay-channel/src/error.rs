use keyrelay_core::RepositoryError;
use thiserror::Error;

/// Errors raised while resolving or driving a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The group has an empty upstream list.
    #[error("at least one upstream is required for {0} channel")]
    NoUpstreams(String),

    /// An upstream URL could not be parsed.
    #[error("failed to parse upstream url '{url}': {message}")]
    InvalidUpstream { url: String, message: String },

    /// No static or dynamic constructor and no enabled catalogue entry.
    #[error("unsupported channel type '{0}' and no script found")]
    UnsupportedType(String),

    /// No enabled catalogue entry backs this channel type.
    #[error("no enabled script found for channel type: {0}")]
    NoScript(String),

    /// Building the adapter instance failed.
    #[error("failed to create script channel: {0}")]
    ScriptSetup(String),

    /// `buildUpstreamURL` failed; fatal to the request it served.
    #[error("upstream resolution failed: {0}")]
    UpstreamResolution(String),

    /// `modifyRequest` threw; the request is aborted.
    #[error("request mutation failed: {0}")]
    RequestMutation(String),

    /// Outbound client construction failed.
    #[error("http client error: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
