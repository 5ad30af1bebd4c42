//! Database setup and initialization.
//!
//! `setup_database()` opens (or creates) the `SQLite` database and ensures
//! the schema exists. All statements are idempotent, so the function is safe
//! to call on every startup.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Open the `SQLite` database at `db_url` and ensure the schema exists.
///
/// Accepts any `sqlx` SQLite URL, including `sqlite::memory:`. In-memory
/// databases are pinned to a single pooled connection; every pooled
/// connection would otherwise get its own empty database.
pub async fn setup_database(db_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let mut pool_options = SqlitePoolOptions::new();
    if db_url.contains(":memory:") {
        pool_options = pool_options.max_connections(1);
    }
    let pool = pool_options.connect_with(options).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Open the database file at `db_path`, creating parent directories.
pub async fn setup_database_at(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full production schema, for tests.
pub async fn setup_test_database() -> Result<SqlitePool> {
    setup_database("sqlite::memory:").await
}

/// Create the catalogue schema.
///
/// `channel_type` is unique across the table regardless of status, so a
/// group name resolves to at most one adapter.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channel_scripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL,
            channel_type TEXT NOT NULL,
            script TEXT NOT NULL,
            metadata TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'disabled'
                CHECK (status IN ('disabled', 'enabled', 'error')),
            error_msg TEXT NOT NULL DEFAULT '',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_scripts_channel_type
         ON channel_scripts(channel_type)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_scripts_name
         ON channel_scripts(name)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_channel_scripts_status
         ON channel_scripts(status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
