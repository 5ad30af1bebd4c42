//! Sandboxed JavaScript runtime for keyrelay channel adapters.
//!
//! Operators integrate new upstream API families by uploading scripts that
//! implement the five-hook adapter contract. This crate owns the two trust
//! boundaries those scripts cross:
//!
//! - [`ScriptSecurityValidator`] rejects unsafe or malformed source before it
//!   ever executes against live traffic (size cap, textual denylist,
//!   complexity caps, then one parse-and-execute pass in a throwaway engine).
//! - [`ScriptInstance`] runs an accepted script inside a stripped engine with
//!   a curated `utils`/`console` surface and per-instance resource counters,
//!   dispatching hooks from the proxy path as JSON snapshots.
//!
//! The engine is never shared across adapters; each instance owns one VM on
//! its own worker thread, which also serializes hook execution.

pub mod error;
pub mod instance;
pub mod logs;
pub mod sandbox;
pub mod security;

pub use error::ScriptError;
pub use instance::{HookKind, ScriptInstance};
pub use logs::ScriptLogStore;
pub use sandbox::headers;
pub use security::ScriptSecurityValidator;
