//! Named actions dispatched by the scheduler and automation rules.
//!
//! The action vocabulary is open: operators register actions by name and the
//! scheduler dispatches them without knowing what they do. Because the
//! scheduler re-invokes an action after a failed firing, every action must be
//! idempotent-safe to retry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Built-in action name: drain pending agents of active missions.
pub const PROCESS_QUEUE: &str = "agents.process_queue";

/// Built-in action name: run a contradiction-detection pass.
pub const DETECT_CONTRADICTIONS: &str = "memories.detect_contradictions";

/// A named operation plus its parameters, as stored on tasks and rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    Unknown(String),

    #[error("Action failed: {0}")]
    Failed(String),
}

/// Trait for implementing a named action.
#[async_trait]
pub trait Action: Send + Sync {
    /// The unique name this action is registered under.
    fn name(&self) -> &str;

    /// Execute the action for the given owner.
    ///
    /// Implementations must tolerate re-invocation with the same parameters:
    /// the scheduler retries failed firings.
    async fn run(&self, owner: Uuid, params: &Value) -> Result<Value, ActionError>;
}

/// Registry of available actions, keyed by name.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action under its own name, replacing any previous one.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    /// Look up and run the named action.
    pub async fn dispatch(&self, owner: Uuid, call: &ActionCall) -> Result<Value, ActionError> {
        let action = self
            .actions
            .get(&call.name)
            .ok_or_else(|| ActionError::Unknown(call.name.clone()))?;
        action.run(owner, &call.params).await
    }

    /// Names of all registered actions.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "test.echo"
        }

        async fn run(&self, _owner: Uuid, params: &Value) -> Result<Value, ActionError> {
            Ok(params.clone())
        }
    }

    #[tokio::test]
    async fn dispatches_registered_action() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(Echo));

        let call = ActionCall::new("test.echo", json!({"k": 1}));
        let out = registry.dispatch(Uuid::new_v4(), &call).await.unwrap();
        assert_eq!(out, json!({"k": 1}));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let registry = ActionRegistry::new();
        let call = ActionCall::new("nope", Value::Null);
        let err = registry.dispatch(Uuid::new_v4(), &call).await.unwrap_err();
        assert!(matches!(err, ActionError::Unknown(_)));
    }
}
