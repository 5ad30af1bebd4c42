//! `SQLite` implementation of the `ScriptRepository` trait.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use keyrelay_core::{
    ChannelScript, NewChannelScript, RepositoryError, ScriptRepository, ScriptStatus, ScriptUpdate,
};

use super::row_mappers::{row_to_script, SCRIPT_SELECT_COLUMNS};

pub struct SqliteScriptRepository {
    pool: SqlitePool,
}

impl SqliteScriptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> RepositoryError {
    let message = err.to_string();
    if message.contains("UNIQUE constraint failed") {
        RepositoryError::Constraint(message)
    } else {
        RepositoryError::Storage(message)
    }
}

fn serialization(err: serde_json::Error) -> RepositoryError {
    RepositoryError::Serialization(err.to_string())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl ScriptRepository for SqliteScriptRepository {
    async fn list(&self) -> Result<Vec<ChannelScript>, RepositoryError> {
        let query = format!("SELECT {SCRIPT_SELECT_COLUMNS} FROM channel_scripts ORDER BY id");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(row_to_script).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<ChannelScript>, RepositoryError> {
        let query = format!(
            "SELECT {SCRIPT_SELECT_COLUMNS} FROM channel_scripts WHERE status = 'enabled' ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(row_to_script).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<ChannelScript, RepositoryError> {
        let query = format!("SELECT {SCRIPT_SELECT_COLUMNS} FROM channel_scripts WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| RepositoryError::NotFound(format!("Script with ID {id}")))?;
        row_to_script(&row)
    }

    async fn find_by_channel_type(
        &self,
        channel_type: &str,
    ) -> Result<Option<ChannelScript>, RepositoryError> {
        let query =
            format!("SELECT {SCRIPT_SELECT_COLUMNS} FROM channel_scripts WHERE channel_type = ?");
        let row = sqlx::query(&query)
            .bind(channel_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_script).transpose()
    }

    async fn find_enabled_by_channel_type(
        &self,
        channel_type: &str,
    ) -> Result<Option<ChannelScript>, RepositoryError> {
        let query = format!(
            "SELECT {SCRIPT_SELECT_COLUMNS} FROM channel_scripts \
             WHERE channel_type = ? AND status = 'enabled'"
        );
        let row = sqlx::query(&query)
            .bind(channel_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_script).transpose()
    }

    async fn insert(&self, script: &NewChannelScript) -> Result<ChannelScript, RepositoryError> {
        let metadata_json = serde_json::to_string(&script.metadata).map_err(serialization)?;
        let config_json = serde_json::to_string(&script.config).map_err(serialization)?;
        let now = now_rfc3339();

        let result = sqlx::query(
            r#"INSERT INTO channel_scripts (
                name, display_name, description, author, version, channel_type,
                script, metadata, config, status, error_msg, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'disabled', '', ?, ?)"#,
        )
        .bind(&script.name)
        .bind(&script.display_name)
        .bind(&script.description)
        .bind(&script.author)
        .bind(&script.version)
        .bind(&script.channel_type)
        .bind(&script.script)
        .bind(&metadata_json)
        .bind(&config_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_by_id(result.last_insert_rowid()).await
    }

    async fn update(
        &self,
        id: i64,
        patch: &ScriptUpdate,
    ) -> Result<ChannelScript, RepositoryError> {
        // Read-merge-write keeps the statement static; catalogue writes are
        // rare and serialized behind the service.
        let current = self.get_by_id(id).await?;

        let metadata = patch.metadata.as_ref().unwrap_or(&current.metadata);
        let metadata_json = serde_json::to_string(metadata).map_err(serialization)?;
        let config = patch.config.as_ref().unwrap_or(&current.config);
        let config_json = serde_json::to_string(config).map_err(serialization)?;

        sqlx::query(
            r#"UPDATE channel_scripts SET
                name = ?, display_name = ?, description = ?, author = ?, version = ?,
                channel_type = ?, script = ?, metadata = ?, config = ?, updated_at = ?
            WHERE id = ?"#,
        )
        .bind(patch.name.as_ref().unwrap_or(&current.name))
        .bind(patch.display_name.as_ref().unwrap_or(&current.display_name))
        .bind(patch.description.as_ref().unwrap_or(&current.description))
        .bind(patch.author.as_ref().unwrap_or(&current.author))
        .bind(patch.version.as_ref().unwrap_or(&current.version))
        .bind(patch.channel_type.as_ref().unwrap_or(&current.channel_type))
        .bind(patch.script.as_ref().unwrap_or(&current.script))
        .bind(&metadata_json)
        .bind(&config_json)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_by_id(id).await
    }

    async fn set_status(&self, id: i64, status: ScriptStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE channel_scripts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Script with ID {id}")));
        }
        Ok(())
    }

    async fn disable_others(
        &self,
        channel_type: &str,
        keep_id: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE channel_scripts SET status = 'disabled', updated_at = ? \
             WHERE channel_type = ? AND id != ?",
        )
        .bind(now_rfc3339())
        .bind(channel_type)
        .bind(keep_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn mark_enabled(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE channel_scripts SET status = 'enabled', error_msg = '', \
             last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Script with ID {id}")));
        }
        Ok(())
    }

    async fn mark_error(&self, id: i64, message: &str) -> Result<(), RepositoryError> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE channel_scripts SET status = 'error', error_msg = ?, \
             last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Script with ID {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM channel_scripts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Script with ID {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use keyrelay_core::ScriptMetadata;

    fn new_script(name: &str, channel_type: &str) -> NewChannelScript {
        NewChannelScript {
            name: name.to_string(),
            display_name: format!("{name} adapter"),
            description: "test".to_string(),
            author: "ops".to_string(),
            version: "1.0.0".to_string(),
            channel_type: channel_type.to_string(),
            script: "function exports() {}".to_string(),
            metadata: ScriptMetadata {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                description: "test".to_string(),
                author: "ops".to_string(),
                channel_type: channel_type.to_string(),
                ..Default::default()
            },
            config: serde_json::Map::new(),
        }
    }

    async fn repo() -> SqliteScriptRepository {
        SqliteScriptRepository::new(setup_test_database().await.unwrap())
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let repo = repo().await;
        let created = repo.insert(&new_script("grok", "grok")).await.unwrap();

        assert_eq!(created.status, ScriptStatus::Disabled);
        assert!(created.error_msg.is_none());

        let fetched = repo.get_by_id(created.id).await.unwrap();
        assert_eq!(fetched.name, "grok");
        assert_eq!(fetched.metadata.channel_type, "grok");
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn duplicate_channel_type_violates_constraint() {
        let repo = repo().await;
        repo.insert(&new_script("a", "grok")).await.unwrap();
        let err = repo.insert(&new_script("b", "grok")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[tokio::test]
    async fn status_transitions_maintain_error_fields() {
        let repo = repo().await;
        let created = repo.insert(&new_script("grok", "grok")).await.unwrap();

        repo.mark_error(created.id, "boom").await.unwrap();
        let errored = repo.get_by_id(created.id).await.unwrap();
        assert_eq!(errored.status, ScriptStatus::Error);
        assert_eq!(errored.error_msg.as_deref(), Some("boom"));
        assert!(errored.last_error.is_some());

        repo.mark_enabled(created.id).await.unwrap();
        let enabled = repo.get_by_id(created.id).await.unwrap();
        assert_eq!(enabled.status, ScriptStatus::Enabled);
        assert!(enabled.error_msg.is_none());
        assert!(enabled.last_error.is_none());
    }

    #[tokio::test]
    async fn update_patch_touches_only_given_fields() {
        let repo = repo().await;
        let created = repo.insert(&new_script("grok", "grok")).await.unwrap();

        let patch = ScriptUpdate {
            script: Some("function exports() { return 1; }".to_string()),
            ..Default::default()
        };
        let updated = repo.update(created.id, &patch).await.unwrap();

        assert_eq!(updated.script, "function exports() { return 1; }");
        assert_eq!(updated.name, "grok");
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn enabled_lookup_ignores_disabled_entries() {
        let repo = repo().await;
        let created = repo.insert(&new_script("grok", "grok")).await.unwrap();

        assert!(repo
            .find_enabled_by_channel_type("grok")
            .await
            .unwrap()
            .is_none());

        repo.mark_enabled(created.id).await.unwrap();
        let found = repo.find_enabled_by_channel_type("grok").await.unwrap();
        assert_eq!(found.unwrap().id, created.id);

        assert_eq!(repo.list_enabled().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let repo = repo().await;
        let created = repo.insert(&new_script("grok", "grok")).await.unwrap();
        repo.delete(created.id).await.unwrap();
        assert!(matches!(
            repo.get_by_id(created.id).await.unwrap_err(),
            RepositoryError::NotFound(_)
        ));
        assert!(matches!(
            repo.delete(created.id).await.unwrap_err(),
            RepositoryError::NotFound(_)
        ));
    }
}
