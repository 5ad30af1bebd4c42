//! Composition utilities for wiring `SQLite` repositories.
//!
//! Construction only; no domain logic lives here.

use sqlx::SqlitePool;
use std::sync::Arc;

use keyrelay_core::ScriptRepository;

use crate::repositories::SqliteScriptRepository;

/// Factory for repository instances backed by `SQLite`.
pub struct CoreFactory;

impl CoreFactory {
    /// Create a script repository as a trait object.
    pub fn script_repository(pool: SqlitePool) -> Arc<dyn ScriptRepository> {
        Arc::new(SqliteScriptRepository::new(pool))
    }
}
