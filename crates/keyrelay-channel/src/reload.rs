//! Hot-reload controller for script channels.
//!
//! Reconciles the persisted catalogue against the factory's dynamic registry
//! on a periodic tick and on explicit reload requests. Content drift is
//! detected through a version key derived from the entry's update timestamp
//! and a source hash. A failed rebuild keeps the previous instance live; the
//! catalogue only moves to `error` when the failure happens on first load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keyrelay_core::{ChannelScript, ScriptRepository, ScriptStatus};
use keyrelay_script::{ScriptInstance, ScriptLogStore};

use crate::error::ChannelError;
use crate::factory::ChannelFactory;

/// Catalogue poll interval.
const RELOAD_INTERVAL: Duration = Duration::from_secs(30);

struct Tracked {
    version: String,
    channel_type: String,
}

/// Background reconciler between the catalogue and the live registry.
pub struct ScriptReloader {
    repo: Arc<dyn ScriptRepository>,
    factory: Arc<ChannelFactory>,
    logs: Arc<ScriptLogStore>,
    // Tracked versions keyed by catalogue id; the lock doubles as the
    // reconcile mutex so ticks and explicit reloads never interleave.
    versions: Mutex<HashMap<i64, Tracked>>,
    interval: Duration,
}

impl ScriptReloader {
    pub fn new(
        repo: Arc<dyn ScriptRepository>,
        factory: Arc<ChannelFactory>,
        logs: Arc<ScriptLogStore>,
    ) -> Self {
        Self::with_interval(repo, factory, logs, RELOAD_INTERVAL)
    }

    pub fn with_interval(
        repo: Arc<dyn ScriptRepository>,
        factory: Arc<ChannelFactory>,
        logs: Arc<ScriptLogStore>,
        interval: Duration,
    ) -> Self {
        Self {
            repo,
            factory,
            logs,
            versions: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Start the reconciliation loop. The first tick fires immediately and
    /// doubles as the initial load of enabled scripts.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("script reloader started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.reconcile().await {
                            error!(error = %err, "script reload tick failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("script reloader stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Force a reconciliation pass now.
    pub async fn reload_all(&self) -> Result<(), ChannelError> {
        self.reconcile().await
    }

    /// Reconcile a single catalogue entry by id.
    pub async fn reload_one(&self, id: i64) -> Result<(), ChannelError> {
        let mut versions = self.versions.lock().await;

        let script = match self.repo.get_by_id(id).await {
            Ok(script) => script,
            Err(err) => {
                // A deleted entry still needs its constructor torn down.
                if let Some(tracked) = versions.remove(&id) {
                    self.teardown(&tracked.channel_type);
                }
                return Err(err.into());
            }
        };

        if script.status != ScriptStatus::Enabled {
            match versions.remove(&id) {
                Some(tracked) => self.teardown(&tracked.channel_type),
                None => self.teardown(&script.channel_type),
            }
            info!(script = %script.name, "script disabled and unregistered");
            return Ok(());
        }

        let first_load = !versions.contains_key(&id);
        let version = version_key(&script);
        match self.load(&script).await {
            Ok(()) => {
                if let Some(previous) = versions.get(&id) {
                    if previous.channel_type != script.channel_type {
                        self.teardown(&previous.channel_type);
                    }
                }
                versions.insert(
                    id,
                    Tracked {
                        version,
                        channel_type: script.channel_type.clone(),
                    },
                );
                Ok(())
            }
            Err(err) => {
                if first_load {
                    let _ = self.repo.mark_error(id, &err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    /// Channel types currently served by loaded scripts.
    pub fn active_scripts(&self) -> Vec<String> {
        self.factory.dynamic_channel_types()
    }

    pub fn is_script_active(&self, channel_type: &str) -> bool {
        self.factory.is_dynamic(channel_type)
    }

    async fn reconcile(&self) -> Result<(), ChannelError> {
        let mut versions = self.versions.lock().await;
        let enabled = self.repo.list_enabled().await?;

        for script in &enabled {
            let version = version_key(script);
            let first_load = !versions.contains_key(&script.id);
            let changed = versions
                .get(&script.id)
                .map(|tracked| tracked.version != version)
                .unwrap_or(true);
            if !changed {
                continue;
            }

            info!(
                script = %script.name,
                channel_type = %script.channel_type,
                version = %version,
                "script update detected, reloading"
            );

            match self.load(script).await {
                Ok(()) => {
                    if let Some(previous) = versions.get(&script.id) {
                        if previous.channel_type != script.channel_type {
                            self.teardown(&previous.channel_type);
                        }
                    }
                    versions.insert(
                        script.id,
                        Tracked {
                            version,
                            channel_type: script.channel_type.clone(),
                        },
                    );
                }
                Err(err) => {
                    warn!(
                        script = %script.name,
                        error = %err,
                        "failed to reload script"
                    );
                    if first_load {
                        let _ = self.repo.mark_error(script.id, &err.to_string()).await;
                    }
                    // On a reload failure the prior instance stays live.
                }
            }
        }

        // Tear down constructors whose entries are no longer enabled.
        let enabled_ids: std::collections::HashSet<i64> =
            enabled.iter().map(|script| script.id).collect();
        let stale: Vec<(i64, String)> = versions
            .iter()
            .filter(|(id, _)| !enabled_ids.contains(id))
            .map(|(id, tracked)| (*id, tracked.channel_type.clone()))
            .collect();
        for (id, channel_type) in stale {
            versions.remove(&id);
            self.teardown(&channel_type);
            info!(channel_type = %channel_type, "script removed from active scripts");
        }

        Ok(())
    }

    /// Build a fresh instance and swap it into the registry, invalidating
    /// cached channels for groups bound to this type.
    async fn load(&self, script: &ChannelScript) -> Result<(), ChannelError> {
        let script = Arc::new(script.clone());
        let spawn_target = Arc::clone(&script);
        let logs = Arc::clone(&self.logs);

        let instance = tokio::task::spawn_blocking(move || ScriptInstance::spawn(&spawn_target, logs))
            .await
            .map_err(|err| ChannelError::ScriptSetup(err.to_string()))?
            .map_err(|err| ChannelError::ScriptSetup(err.to_string()))?;

        self.factory
            .register_dynamic(Arc::clone(&script), Arc::new(instance));
        self.factory.invalidate_channel_type(&script.channel_type);

        info!(
            script = %script.name,
            channel_type = %script.channel_type,
            version = %script.version,
            "script loaded"
        );
        Ok(())
    }

    fn teardown(&self, channel_type: &str) {
        self.factory.unregister_dynamic(channel_type);
        self.factory.invalidate_channel_type(channel_type);
    }
}

/// Version key: update timestamp plus a short content hash, so both metadata
/// edits and raw source drift force a rebuild.
fn version_key(script: &ChannelScript) -> String {
    format!(
        "{}-{}",
        script.updated_at.to_rfc3339(),
        content_hash(&script.script)
    )
}

fn content_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyrelay_core::ScriptMetadata;

    fn script_with(source: &str, updated_at: chrono::DateTime<chrono::Utc>) -> ChannelScript {
        ChannelScript {
            id: 1,
            name: "s".to_string(),
            display_name: String::new(),
            description: String::new(),
            author: String::new(),
            version: "1.0.0".to_string(),
            channel_type: "t".to_string(),
            script: source.to_string(),
            metadata: ScriptMetadata::default(),
            config: serde_json::Map::new(),
            status: ScriptStatus::Enabled,
            error_msg: None,
            last_error: None,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn version_key_tracks_source_and_timestamp() {
        let now = Utc::now();
        let a = script_with("var x = 1;", now);
        let b = script_with("var x = 2;", now);
        assert_ne!(version_key(&a), version_key(&b));

        let later = now + chrono::Duration::seconds(5);
        let c = script_with("var x = 1;", later);
        assert_ne!(version_key(&a), version_key(&c));
        assert_eq!(version_key(&a), version_key(&script_with("var x = 1;", now)));
    }

    #[test]
    fn content_hash_is_sixteen_hex_chars() {
        let hash = content_hash("function exports() {}");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
