//! Row mapping helpers for `SQLite` queries.

use chrono::{DateTime, Utc};
use sqlx::Row;

use keyrelay_core::{ChannelScript, RepositoryError, ScriptStatus};

/// Shared SELECT column list for catalogue queries.
pub const SCRIPT_SELECT_COLUMNS: &str = "id, name, display_name, description, author, version, \
     channel_type, script, metadata, config, status, error_msg, last_error, created_at, updated_at";

fn storage(err: impl ToString) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Storage(format!("bad timestamp '{value}': {err}")))
}

/// Parse a database row into a `ChannelScript`.
pub fn row_to_script(row: &sqlx::sqlite::SqliteRow) -> Result<ChannelScript, RepositoryError> {
    let metadata_json: String = row.try_get("metadata").map_err(storage)?;
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|err| RepositoryError::Serialization(err.to_string()))?;

    let config_json: String = row.try_get("config").map_err(storage)?;
    let config = serde_json::from_str(&config_json).unwrap_or_default();

    let status_str: String = row.try_get("status").map_err(storage)?;
    let status = ScriptStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Storage(format!("unknown status '{status_str}'")))?;

    let error_msg: String = row.try_get("error_msg").map_err(storage)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(storage)?;
    let created_at: String = row.try_get("created_at").map_err(storage)?;
    let updated_at: String = row.try_get("updated_at").map_err(storage)?;

    Ok(ChannelScript {
        id: row.try_get("id").map_err(storage)?,
        name: row.try_get("name").map_err(storage)?,
        display_name: row.try_get("display_name").map_err(storage)?,
        description: row.try_get("description").map_err(storage)?,
        author: row.try_get("author").map_err(storage)?,
        version: row.try_get("version").map_err(storage)?,
        channel_type: row.try_get("channel_type").map_err(storage)?,
        script: row.try_get("script").map_err(storage)?,
        metadata,
        config,
        status,
        error_msg: (!error_msg.is_empty()).then_some(error_msg),
        last_error: last_error.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}
