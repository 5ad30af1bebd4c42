//! Shared application state type.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use keyrelay_channel::{ChannelFactory, ScriptReloader};
use keyrelay_core::ScriptService;

/// Everything the admin handlers need, wired once at bootstrap.
pub struct AxumContext {
    /// Catalogue service (validation-gated CRUD).
    pub scripts: Arc<ScriptService>,
    /// Channel factory (registries + per-group cache).
    pub factory: Arc<ChannelFactory>,
    /// Hot-reload controller.
    pub reloader: Arc<ScriptReloader>,
    /// Cancels the reload loop on shutdown.
    pub shutdown: CancellationToken,
}

/// Application state shared across all handlers.
pub type AppState = Arc<AxumContext>;
