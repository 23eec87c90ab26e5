//! Plugin storage with pluggable backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{Plugin, PluginExecution, SandboxError};

/// Plugin store trait - implemented by all storage backends.
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn insert_plugin(&self, plugin: Plugin) -> Result<(), SandboxError>;

    async fn get_plugin(&self, id: Uuid) -> Result<Option<Plugin>, SandboxError>;

    async fn plugins_for_owner(&self, owner: Uuid) -> Result<Vec<Plugin>, SandboxError>;

    /// Append to the plugin's execution history.
    async fn append_execution(&self, execution: PluginExecution) -> Result<(), SandboxError>;

    async fn executions_for(&self, plugin_id: Uuid)
        -> Result<Vec<PluginExecution>, SandboxError>;
}

#[derive(Default)]
struct PluginState {
    plugins: HashMap<Uuid, Plugin>,
    executions: Vec<PluginExecution>,
}

/// In-memory plugin store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryPluginStore {
    state: Arc<RwLock<PluginState>>,
}

impl InMemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for InMemoryPluginStore {
    async fn insert_plugin(&self, plugin: Plugin) -> Result<(), SandboxError> {
        self.state.write().await.plugins.insert(plugin.id, plugin);
        Ok(())
    }

    async fn get_plugin(&self, id: Uuid) -> Result<Option<Plugin>, SandboxError> {
        Ok(self.state.read().await.plugins.get(&id).cloned())
    }

    async fn plugins_for_owner(&self, owner: Uuid) -> Result<Vec<Plugin>, SandboxError> {
        Ok(self
            .state
            .read()
            .await
            .plugins
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect())
    }

    async fn append_execution(&self, execution: PluginExecution) -> Result<(), SandboxError> {
        self.state.write().await.executions.push(execution);
        Ok(())
    }

    async fn executions_for(
        &self,
        plugin_id: Uuid,
    ) -> Result<Vec<PluginExecution>, SandboxError> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .iter()
            .filter(|e| e.plugin_id == plugin_id)
            .cloned()
            .collect())
    }
}
