//! Catalogue service: CRUD over channel scripts, gated by security
//! validation and the channel-type uniqueness invariant.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{ChannelScript, NewChannelScript, ScriptMetadata, ScriptStatus, ScriptUpdate};
use crate::ports::{
    CoreError, RepositoryError, ScriptLogRecord, ScriptLogSink, ScriptRepository, ScriptValidator,
    TestReport, ValidationReport,
};

/// Handles channel-script catalogue operations.
///
/// Every write that changes validated content re-runs the security validator
/// before persisting. Validation executes on a blocking thread because it
/// parses and evaluates the source in a throwaway engine.
pub struct ScriptService {
    repo: Arc<dyn ScriptRepository>,
    validator: Arc<dyn ScriptValidator>,
    logs: Arc<dyn ScriptLogSink>,
}

impl ScriptService {
    pub fn new(
        repo: Arc<dyn ScriptRepository>,
        validator: Arc<dyn ScriptValidator>,
        logs: Arc<dyn ScriptLogSink>,
    ) -> Self {
        Self {
            repo,
            validator,
            logs,
        }
    }

    /// List every catalogue entry.
    pub async fn list(&self) -> Result<Vec<ChannelScript>, CoreError> {
        Ok(self.repo.list().await?)
    }

    /// Fetch one entry by id.
    pub async fn get(&self, id: i64) -> Result<ChannelScript, CoreError> {
        Ok(self.repo.get_by_id(id).await?)
    }

    /// List entries that are currently enabled.
    pub async fn list_enabled(&self) -> Result<Vec<ChannelScript>, CoreError> {
        Ok(self.repo.list_enabled().await?)
    }

    /// Create a new entry. Validates first; rejects channel-type collisions;
    /// persists with status `disabled`.
    pub async fn create(&self, script: NewChannelScript) -> Result<ChannelScript, CoreError> {
        self.run_validation(script.script.clone(), script.metadata.clone())
            .await?;
        self.ensure_channel_type_free(&script.channel_type, None)
            .await?;

        let created = self.repo.insert(&script).await?;
        info!(
            script = %created.name,
            channel_type = %created.channel_type,
            "channel script created"
        );
        Ok(created)
    }

    /// Patch an existing entry. When the patch touches the source or the
    /// metadata, the effective combination is re-validated before persisting.
    pub async fn update(&self, id: i64, patch: ScriptUpdate) -> Result<ChannelScript, CoreError> {
        let current = self.repo.get_by_id(id).await?;

        if !patch.is_content_unchanged() {
            let source = patch.script.clone().unwrap_or_else(|| current.script.clone());
            let metadata = patch
                .metadata
                .clone()
                .unwrap_or_else(|| current.metadata.clone());
            self.run_validation(source, metadata).await?;
        }

        if let Some(channel_type) = &patch.channel_type {
            if channel_type != &current.channel_type {
                self.ensure_channel_type_free(channel_type, Some(id)).await?;
            }
        }

        Ok(self.repo.update(id, &patch).await?)
    }

    /// Delete an entry, force-disabling it first so the reloader unregisters
    /// the constructor on its next pass.
    pub async fn delete(&self, id: i64) -> Result<(), CoreError> {
        let script = self.repo.get_by_id(id).await?;
        if script.status == ScriptStatus::Enabled {
            self.repo.set_status(id, ScriptStatus::Disabled).await?;
        }
        self.repo.delete(id).await?;
        info!(script = %script.name, "channel script deleted");
        Ok(())
    }

    /// Enable an entry.
    ///
    /// Re-runs validation; a failure here transitions the entry to `error`.
    /// On success, any other entry sharing the channel type is disabled
    /// before this one is marked enabled with its error fields cleared.
    pub async fn enable(&self, id: i64) -> Result<(), CoreError> {
        let script = self.repo.get_by_id(id).await?;

        if let Err(err) = self
            .run_validation(script.script.clone(), script.metadata.clone())
            .await
        {
            if let CoreError::Validation(rejection) = &err {
                warn!(
                    script = %script.name,
                    error = %rejection,
                    "cannot enable invalid script"
                );
                self.repo.mark_error(id, &rejection.to_string()).await?;
            }
            return Err(err);
        }

        self.repo.disable_others(&script.channel_type, id).await?;
        self.repo.mark_enabled(id).await?;
        info!(
            script = %script.name,
            channel_type = %script.channel_type,
            "channel script enabled"
        );
        Ok(())
    }

    /// Disable an entry unconditionally.
    pub async fn disable(&self, id: i64) -> Result<(), CoreError> {
        self.repo.get_by_id(id).await?;
        self.repo.set_status(id, ScriptStatus::Disabled).await?;
        Ok(())
    }

    /// Run the security validator against a candidate without persisting.
    pub async fn validate(&self, source: String, metadata: ScriptMetadata) -> ValidationReport {
        match self.run_validation(source, metadata).await {
            Ok(()) => ValidationReport::ok(),
            Err(CoreError::Validation(err)) => ValidationReport::rejected(err),
            Err(err) => ValidationReport {
                valid: false,
                message: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Validate plus an `exports()` smoke call in a throwaway sandbox.
    pub async fn test(&self, source: String, metadata: ScriptMetadata) -> TestReport {
        let validator = Arc::clone(&self.validator);
        tokio::task::spawn_blocking(move || validator.smoke_test(&source, &metadata))
            .await
            .unwrap_or_else(|err| TestReport {
                valid: false,
                message: Some("Failed to create runtime".to_string()),
                error: Some(err.to_string()),
                runtime: None,
            })
    }

    /// Recent adapter log records for one entry.
    pub async fn logs(&self, id: i64) -> Result<Vec<ScriptLogRecord>, CoreError> {
        let script = self.repo.get_by_id(id).await?;
        Ok(self.logs.records(&script.name))
    }

    async fn run_validation(
        &self,
        source: String,
        metadata: ScriptMetadata,
    ) -> Result<(), CoreError> {
        let validator = Arc::clone(&self.validator);
        tokio::task::spawn_blocking(move || validator.validate(&source, &metadata))
            .await
            .map_err(|err| CoreError::Internal(format!("validator task failed: {err}")))?
            .map_err(CoreError::Validation)
    }

    async fn ensure_channel_type_free(
        &self,
        channel_type: &str,
        exclude_id: Option<i64>,
    ) -> Result<(), CoreError> {
        if let Some(existing) = self.repo.find_by_channel_type(channel_type).await? {
            if Some(existing.id) != exclude_id {
                return Err(CoreError::Repository(RepositoryError::Constraint(format!(
                    "channel type '{channel_type}' already exists"
                ))));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ValidationError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryRepo {
        rows: Mutex<HashMap<i64, ChannelScript>>,
        next_id: Mutex<i64>,
    }

    impl MemoryRepo {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1),
            }
        }
    }

    #[async_trait]
    impl ScriptRepository for MemoryRepo {
        async fn list(&self) -> Result<Vec<ChannelScript>, RepositoryError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }

        async fn list_enabled(&self) -> Result<Vec<ChannelScript>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == ScriptStatus::Enabled)
                .cloned()
                .collect())
        }

        async fn get_by_id(&self, id: i64) -> Result<ChannelScript, RepositoryError> {
            self.rows
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))
        }

        async fn find_by_channel_type(
            &self,
            channel_type: &str,
        ) -> Result<Option<ChannelScript>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|s| s.channel_type == channel_type)
                .cloned())
        }

        async fn find_enabled_by_channel_type(
            &self,
            channel_type: &str,
        ) -> Result<Option<ChannelScript>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|s| s.channel_type == channel_type && s.status == ScriptStatus::Enabled)
                .cloned())
        }

        async fn insert(
            &self,
            script: &NewChannelScript,
        ) -> Result<ChannelScript, RepositoryError> {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            let now = Utc::now();
            let row = ChannelScript {
                id,
                name: script.name.clone(),
                display_name: script.display_name.clone(),
                description: script.description.clone(),
                author: script.author.clone(),
                version: script.version.clone(),
                channel_type: script.channel_type.clone(),
                script: script.script.clone(),
                metadata: script.metadata.clone(),
                config: script.config.clone(),
                status: ScriptStatus::Disabled,
                error_msg: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            self.rows.lock().unwrap().insert(id, row.clone());
            Ok(row)
        }

        async fn update(
            &self,
            id: i64,
            patch: &ScriptUpdate,
        ) -> Result<ChannelScript, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))?;
            if let Some(script) = &patch.script {
                row.script = script.clone();
            }
            if let Some(channel_type) = &patch.channel_type {
                row.channel_type = channel_type.clone();
            }
            row.updated_at = Utc::now();
            Ok(row.clone())
        }

        async fn set_status(&self, id: i64, status: ScriptStatus) -> Result<(), RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))?;
            row.status = status;
            Ok(())
        }

        async fn disable_others(
            &self,
            channel_type: &str,
            keep_id: i64,
        ) -> Result<(), RepositoryError> {
            for row in self.rows.lock().unwrap().values_mut() {
                if row.channel_type == channel_type && row.id != keep_id {
                    row.status = ScriptStatus::Disabled;
                }
            }
            Ok(())
        }

        async fn mark_enabled(&self, id: i64) -> Result<(), RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))?;
            row.status = ScriptStatus::Enabled;
            row.error_msg = None;
            row.last_error = None;
            Ok(())
        }

        async fn mark_error(&self, id: i64, message: &str) -> Result<(), RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))?;
            row.status = ScriptStatus::Error;
            row.error_msg = Some(message.to_string());
            row.last_error = Some(Utc::now());
            Ok(())
        }

        async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
            self.rows
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| RepositoryError::NotFound(format!("script {id}")))
        }
    }

    struct StubValidator {
        reject_with: Option<String>,
    }

    impl ScriptValidator for StubValidator {
        fn validate(&self, _source: &str, _metadata: &ScriptMetadata) -> Result<(), ValidationError> {
            match &self.reject_with {
                Some(message) => Err(ValidationError::new(message.clone())),
                None => Ok(()),
            }
        }

        fn smoke_test(&self, source: &str, metadata: &ScriptMetadata) -> TestReport {
            match self.validate(source, metadata) {
                Ok(()) => TestReport {
                    valid: true,
                    message: Some("Script test completed successfully".to_string()),
                    error: None,
                    runtime: Some("runtime created".to_string()),
                },
                Err(err) => TestReport {
                    valid: false,
                    message: None,
                    error: Some(err.to_string()),
                    runtime: None,
                },
            }
        }
    }

    struct NoLogs;

    impl ScriptLogSink for NoLogs {
        fn records(&self, _script_name: &str) -> Vec<ScriptLogRecord> {
            Vec::new()
        }
    }

    fn service(reject_with: Option<&str>) -> ScriptService {
        ScriptService::new(
            Arc::new(MemoryRepo::new()),
            Arc::new(StubValidator {
                reject_with: reject_with.map(str::to_string),
            }),
            Arc::new(NoLogs),
        )
    }

    fn new_script(channel_type: &str) -> NewChannelScript {
        NewChannelScript {
            name: format!("{channel_type}_adapter"),
            display_name: String::new(),
            description: String::new(),
            author: String::new(),
            version: "1.0.0".to_string(),
            channel_type: channel_type.to_string(),
            script: "function exports() {}".to_string(),
            metadata: ScriptMetadata {
                name: channel_type.to_string(),
                version: "1.0.0".to_string(),
                description: "test".to_string(),
                author: "test".to_string(),
                channel_type: channel_type.to_string(),
                ..Default::default()
            },
            config: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn create_defaults_to_disabled() {
        let service = service(None);
        let created = service.create(new_script("grok")).await.unwrap();
        assert_eq!(created.status, ScriptStatus::Disabled);
        let fetched = service.get(created.id).await.unwrap();
        assert_eq!(fetched.channel_type, "grok");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_channel_type() {
        let service = service(None);
        service.create(new_script("grok")).await.unwrap();
        let err = service.create(new_script("grok")).await.unwrap_err();
        assert!(err.to_string().contains("channel type 'grok' already exists"));
    }

    #[tokio::test]
    async fn create_surfaces_validator_rejection_verbatim() {
        let service = service(Some("script contains forbidden pattern: eval\\s*\\("));
        let err = service.create(new_script("grok")).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("forbidden pattern"));
    }

    #[tokio::test]
    async fn enable_disable_enable_is_idempotent_in_final_state() {
        let service = service(None);
        let created = service.create(new_script("grok")).await.unwrap();

        service.enable(created.id).await.unwrap();
        service.disable(created.id).await.unwrap();
        service.enable(created.id).await.unwrap();

        let fetched = service.get(created.id).await.unwrap();
        assert_eq!(fetched.status, ScriptStatus::Enabled);
        assert!(fetched.error_msg.is_none());
        assert!(fetched.last_error.is_none());
    }

    #[tokio::test]
    async fn enable_with_failing_validation_moves_entry_to_error() {
        let ok = service(None);
        let created = ok.create(new_script("grok")).await.unwrap();

        // Same repo, now with a validator that rejects.
        let repo = Arc::clone(&ok.repo);
        let failing = ScriptService::new(
            repo,
            Arc::new(StubValidator {
                reject_with: Some("syntax error: unexpected token".to_string()),
            }),
            Arc::new(NoLogs),
        );

        let err = failing.enable(created.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let fetched = failing.get(created.id).await.unwrap();
        assert_eq!(fetched.status, ScriptStatus::Error);
        assert_eq!(
            fetched.error_msg.as_deref(),
            Some("syntax error: unexpected token")
        );
        assert!(fetched.last_error.is_some());
    }

    #[tokio::test]
    async fn enable_leaves_other_channel_types_untouched() {
        let service = service(None);
        let first = service.create(new_script("grok")).await.unwrap();
        let second = service.create(new_script("tavily")).await.unwrap();

        service.enable(first.id).await.unwrap();
        service.enable(second.id).await.unwrap();

        let enabled = service.list_enabled().await.unwrap();
        let types: Vec<_> = enabled.iter().map(|s| s.channel_type.as_str()).collect();
        assert!(types.contains(&"grok"));
        assert!(types.contains(&"tavily"));
    }

    #[tokio::test]
    async fn delete_force_disables_first() {
        let service = service(None);
        let created = service.create(new_script("grok")).await.unwrap();
        service.enable(created.id).await.unwrap();
        service.delete(created.id).await.unwrap();
        assert!(matches!(
            service.get(created.id).await.unwrap_err(),
            CoreError::Repository(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn validate_is_pure_and_reports_shape() {
        let service = service(None);
        let metadata = new_script("grok").metadata;
        let first = service
            .validate("function exports() {}".to_string(), metadata.clone())
            .await;
        let second = service
            .validate("function exports() {}".to_string(), metadata)
            .await;
        assert!(first.valid && second.valid);
        assert_eq!(first.message.as_deref(), Some("Script is valid"));
    }
}
