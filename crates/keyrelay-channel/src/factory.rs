//! Channel factory: constructor registries plus the per-group instance
//! cache.
//!
//! Resolution order on `get_channel` is dynamic constructor, then static
//! constructor, then a last-resort lazy bind against the catalogue (covering
//! the window before the reloader's next tick). The static table is fixed at
//! compile time; the dynamic table is mutated by the reloader.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use keyrelay_core::{ChannelScript, Group, ScriptRepository};
use keyrelay_script::{ScriptInstance, ScriptLogStore};

use crate::error::ChannelError;
use crate::proxy::ChannelProxy;
use crate::script_channel::ScriptChannel;
use crate::static_channels::{build_static_channel, STATIC_CHANNEL_TYPES};

#[derive(Clone)]
struct DynamicEntry {
    script: Arc<ChannelScript>,
    instance: Arc<ScriptInstance>,
}

/// Creates and caches channel instances per group.
pub struct ChannelFactory {
    repo: Arc<dyn ScriptRepository>,
    logs: Arc<ScriptLogStore>,
    dynamic: RwLock<HashMap<String, DynamicEntry>>,
    cache: Mutex<HashMap<i64, Arc<dyn ChannelProxy>>>,
}

impl ChannelFactory {
    pub fn new(repo: Arc<dyn ScriptRepository>, logs: Arc<ScriptLogStore>) -> Self {
        Self {
            repo,
            logs,
            dynamic: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn log_store(&self) -> Arc<ScriptLogStore> {
        Arc::clone(&self.logs)
    }

    /// Resolve the channel serving a group, creating and caching it if the
    /// cached one is missing or stale.
    pub async fn get_channel(&self, group: &Group) -> Result<Arc<dyn ChannelProxy>, ChannelError> {
        if let Some(cached) = self.cache.lock().get(&group.id) {
            if !cached.is_config_stale(group) {
                return Ok(Arc::clone(cached));
            }
        }

        debug!(
            group = group.id,
            channel_type = %group.channel_type,
            "creating channel for group"
        );

        let dynamic = self.dynamic.read().get(&group.channel_type).cloned();
        if let Some(entry) = dynamic {
            let channel: Arc<dyn ChannelProxy> =
                Arc::new(ScriptChannel::new(group, &entry.script, entry.instance)?);
            self.cache.lock().insert(group.id, Arc::clone(&channel));
            return Ok(channel);
        }

        if let Some(built) = build_static_channel(group) {
            let channel = built?;
            self.cache.lock().insert(group.id, Arc::clone(&channel));
            return Ok(channel);
        }

        let channel = self.create_script_channel(group).await.map_err(|err| {
            if matches!(err, ChannelError::NoScript(_)) {
                ChannelError::UnsupportedType(group.channel_type.clone())
            } else {
                err
            }
        })?;
        self.cache.lock().insert(group.id, Arc::clone(&channel));
        Ok(channel)
    }

    /// Lazy last-resort bind: look the catalogue up directly. A creation
    /// failure here flips the entry to `error` with the failure message.
    async fn create_script_channel(
        &self,
        group: &Group,
    ) -> Result<Arc<dyn ChannelProxy>, ChannelError> {
        let script = self
            .repo
            .find_enabled_by_channel_type(&group.channel_type)
            .await?
            .ok_or_else(|| ChannelError::NoScript(group.channel_type.clone()))?;
        let script = Arc::new(script);

        let spawn_target = Arc::clone(&script);
        let logs = Arc::clone(&self.logs);
        let spawned = tokio::task::spawn_blocking(move || ScriptInstance::spawn(&spawn_target, logs))
            .await
            .map_err(|err| ChannelError::ScriptSetup(err.to_string()))?;

        match spawned {
            Ok(instance) => {
                let instance = Arc::new(instance);
                info!(
                    script = %script.name,
                    group = group.id,
                    "created script channel via lazy bind"
                );
                let channel = ScriptChannel::new(group, &script, instance)?;
                Ok(Arc::new(channel))
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(mark_err) = self.repo.mark_error(script.id, &message).await {
                    tracing::warn!(
                        script = %script.name,
                        error = %mark_err,
                        "failed to record script load error"
                    );
                }
                Err(ChannelError::ScriptSetup(message))
            }
        }
    }

    /// Install or replace the dynamic constructor for a channel type.
    pub fn register_dynamic(&self, script: Arc<ChannelScript>, instance: Arc<ScriptInstance>) {
        let channel_type = script.channel_type.clone();
        self.dynamic
            .write()
            .insert(channel_type.clone(), DynamicEntry { script, instance });
        info!(channel_type = %channel_type, "dynamic channel registered");
    }

    /// Remove a dynamic constructor. Cache entries bound to the type are not
    /// evicted here; the reloader invalidates them separately.
    pub fn unregister_dynamic(&self, channel_type: &str) {
        self.dynamic.write().remove(channel_type);
        info!(channel_type = %channel_type, "dynamic channel unregistered");
    }

    /// Evict one group's cached channel.
    pub fn invalidate(&self, group_id: i64) {
        self.cache.lock().remove(&group_id);
        debug!(group = group_id, "invalidated channel cache for group");
    }

    /// Evict every cached channel.
    pub fn invalidate_all(&self) {
        self.cache.lock().clear();
        debug!("invalidated all channel cache");
    }

    /// Evict cached channels for every group bound to a channel type.
    pub fn invalidate_channel_type(&self, channel_type: &str) {
        let mut cache = self.cache.lock();
        cache.retain(|_, channel| channel.channel_type() != channel_type);
    }

    /// Union of static and dynamic channel type tags.
    pub fn registered_channel_types(&self) -> Vec<String> {
        let mut types: Vec<String> = STATIC_CHANNEL_TYPES
            .iter()
            .map(|t| t.to_string())
            .collect();
        types.extend(self.dynamic.read().keys().cloned());
        types
    }

    /// Channel types currently backed by a loaded script.
    pub fn dynamic_channel_types(&self) -> Vec<String> {
        self.dynamic.read().keys().cloned().collect()
    }

    pub fn is_dynamic(&self, channel_type: &str) -> bool {
        self.dynamic.read().contains_key(channel_type)
    }

    /// Catalogue entry backing a dynamic type, for the discovery endpoint.
    pub fn dynamic_script(&self, channel_type: &str) -> Option<Arc<ChannelScript>> {
        self.dynamic
            .read()
            .get(channel_type)
            .map(|entry| Arc::clone(&entry.script))
    }
}
