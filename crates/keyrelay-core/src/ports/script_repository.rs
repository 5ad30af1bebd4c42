//! Catalogue repository trait definition.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{ChannelScript, NewChannelScript, ScriptStatus, ScriptUpdate};

/// Repository for channel-script persistence.
///
/// CRUD plus the targeted status transitions the catalogue state machine
/// needs. Implementations own all storage details; no driver types appear in
/// these signatures.
#[async_trait]
pub trait ScriptRepository: Send + Sync {
    /// List every catalogue entry.
    async fn list(&self) -> Result<Vec<ChannelScript>, RepositoryError>;

    /// List entries with status `enabled`.
    async fn list_enabled(&self) -> Result<Vec<ChannelScript>, RepositoryError>;

    /// Fetch one entry by id.
    ///
    /// Returns `Err(RepositoryError::NotFound)` when the id does not exist.
    async fn get_by_id(&self, id: i64) -> Result<ChannelScript, RepositoryError>;

    /// Find the entry bound to a channel type, regardless of status.
    async fn find_by_channel_type(
        &self,
        channel_type: &str,
    ) -> Result<Option<ChannelScript>, RepositoryError>;

    /// Find the enabled entry for a channel type, if any.
    async fn find_enabled_by_channel_type(
        &self,
        channel_type: &str,
    ) -> Result<Option<ChannelScript>, RepositoryError>;

    /// Insert a new entry with status `disabled`.
    ///
    /// Returns the persisted entry with its assigned id.
    async fn insert(&self, script: &NewChannelScript) -> Result<ChannelScript, RepositoryError>;

    /// Apply a partial update and bump `updated_at`.
    async fn update(&self, id: i64, patch: &ScriptUpdate) -> Result<ChannelScript, RepositoryError>;

    /// Set the status of one entry unconditionally.
    async fn set_status(&self, id: i64, status: ScriptStatus) -> Result<(), RepositoryError>;

    /// Disable every other entry sharing `channel_type` (invariant: at most
    /// one enabled entry per channel type).
    async fn disable_others(&self, channel_type: &str, keep_id: i64)
        -> Result<(), RepositoryError>;

    /// Mark one entry enabled, clearing `error_msg` and `last_error`.
    async fn mark_enabled(&self, id: i64) -> Result<(), RepositoryError>;

    /// Mark one entry errored with the load failure message.
    async fn mark_error(&self, id: i64, message: &str) -> Result<(), RepositoryError>;

    /// Delete one entry.
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
