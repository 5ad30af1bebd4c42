//! Channel runtime for keyrelay: the registry of upstream integrations.
//!
//! A channel turns an inbound proxy request into an outbound upstream call.
//! Static channels (OpenAI, Anthropic, Gemini) are compiled in; dynamic
//! channels are script-backed adapters loaded from the catalogue at runtime.
//! The [`ChannelFactory`] caches one bound channel per group and the
//! [`ScriptReloader`] reconciles the live registry against the catalogue on a
//! periodic tick.

pub mod base;
pub mod error;
pub mod factory;
pub mod proxy;
pub mod reload;
pub mod script_channel;
pub mod static_channels;

pub use base::BaseChannel;
pub use error::ChannelError;
pub use factory::ChannelFactory;
pub use proxy::{ChannelProxy, KeyValidation, RequestContext, UpstreamRequest};
pub use reload::ScriptReloader;
pub use script_channel::ScriptChannel;
