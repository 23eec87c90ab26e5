//! Plugin sandbox runner.
//!
//! Runs user-authored snippets through a pluggable runtime with a hard
//! wall-clock timeout and panic containment. A timeout or runtime fault is a
//! normal failed execution: it is recorded like any other run and never
//! crashes the caller or corrupts sibling executions.

mod store;
mod types;

pub use store::{InMemoryPluginStore, PluginStore};
pub use types::{Plugin, PluginExecution, PluginRuntime, SandboxError, SandboxOutput};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Sandbox runner over a pluggable runtime and store.
pub struct SandboxRunner {
    store: Arc<dyn PluginStore>,
    runtime: Arc<dyn PluginRuntime>,
    timeout: Duration,
}

impl SandboxRunner {
    pub fn new(
        store: Arc<dyn PluginStore>,
        runtime: Arc<dyn PluginRuntime>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            runtime,
            timeout,
        }
    }

    pub async fn register(&self, plugin: Plugin) -> Result<(), SandboxError> {
        self.store.insert_plugin(plugin).await
    }

    pub async fn executions(&self, plugin_id: Uuid) -> Result<Vec<PluginExecution>, SandboxError> {
        self.store.executions_for(plugin_id).await
    }

    /// Run a plugin's entrypoint against `input`.
    ///
    /// The invocation runs on its own task so a panicking runtime is
    /// contained, bounded by the configured wall-clock timeout independent of
    /// any caller-side cancellation. Exactly one execution record is written
    /// per call; `Err` is returned only when the plugin does not exist or the
    /// record cannot be stored.
    pub async fn execute(
        &self,
        plugin_id: Uuid,
        input: Value,
    ) -> Result<PluginExecution, SandboxError> {
        let plugin = self
            .store
            .get_plugin(plugin_id)
            .await?
            .ok_or(SandboxError::PluginNotFound(plugin_id))?;

        let started = Instant::now();
        let runtime = Arc::clone(&self.runtime);
        let snapshot = plugin.clone();
        let mut handle = tokio::spawn(async move { runtime.invoke(&snapshot, input).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SandboxError::Fault(format!(
                "plugin task aborted: {join_err}"
            ))),
            Err(_) => {
                handle.abort();
                Err(SandboxError::Timeout(self.timeout))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let execution = match outcome {
            Ok(output) => PluginExecution {
                id: Uuid::new_v4(),
                plugin_id,
                success: true,
                duration_ms,
                logs: output.logs,
                output: Some(output.result),
                error: None,
                created_at: Utc::now(),
            },
            Err(e) => {
                warn!(plugin = %plugin_id, error = %e, "plugin execution failed");
                PluginExecution {
                    id: Uuid::new_v4(),
                    plugin_id,
                    success: false,
                    duration_ms,
                    logs: Vec::new(),
                    output: None,
                    error: Some(e.to_string()),
                    created_at: Utc::now(),
                }
            }
        };

        self.store.append_execution(execution.clone()).await?;
        Ok(execution)
    }
}
