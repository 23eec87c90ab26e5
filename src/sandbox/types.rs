//! Types for the plugin sandbox.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A user-owned sandboxed code unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    /// Source of the snippet, interpreted by the runtime
    pub content: String,
    /// Function the runtime invokes
    pub entrypoint: String,
    /// Declared configuration passed alongside each invocation
    #[serde(default)]
    pub config: Value,
    pub created_at: DateTime<Utc>,
}

impl Plugin {
    pub fn new(
        owner: Uuid,
        name: impl Into<String>,
        content: impl Into<String>,
        entrypoint: impl Into<String>,
        config: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            name: name.into(),
            content: content.into(),
            entrypoint: entrypoint.into(),
            config,
            created_at: Utc::now(),
        }
    }
}

/// What a runtime invocation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub result: Value,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Immutable record of one plugin execution, written for every `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginExecution {
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub success: bool,
    pub duration_ms: u64,
    pub logs: Vec<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Errors in sandbox operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(Uuid),

    #[error("Plugin execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sandbox fault: {0}")]
    Fault(String),
}

/// Executes plugin code with no ambient capability beyond the passed input.
///
/// The runner wraps every invocation in a hard wall-clock timeout and panic
/// containment; implementations only need to interpret the snippet.
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    async fn invoke(&self, plugin: &Plugin, input: Value) -> Result<SandboxOutput, SandboxError>;
}
