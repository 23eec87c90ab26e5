//! Task and rule storage with pluggable backends.
//!
//! The claim step is the scheduler's concurrency primitive: marking a task
//! in-flight happens atomically with selection, so concurrent ticks can
//! never fire the same task twice (at-most-one-in-flight-per-task).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{AutomationRule, RuleExecution, ScheduledTask, SchedulerError, TaskExecution};

/// Task store trait - implemented by all storage backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: ScheduledTask) -> Result<(), SchedulerError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>, SchedulerError>;

    async fn tasks_for_owner(&self, owner: Uuid) -> Result<Vec<ScheduledTask>, SchedulerError>;

    /// Atomically select up to `limit` enabled, due, not-in-flight tasks and
    /// mark them in flight.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, SchedulerError>;

    /// Atomically claim the owner's enabled event-triggered tasks matching
    /// the event name.
    async fn claim_event_tasks(
        &self,
        owner: Uuid,
        event_name: &str,
    ) -> Result<Vec<ScheduledTask>, SchedulerError>;

    /// Write back post-run task state and the immutable execution record,
    /// releasing the in-flight claim.
    async fn complete_run(
        &self,
        task: ScheduledTask,
        execution: TaskExecution,
    ) -> Result<(), SchedulerError>;

    async fn set_task_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<ScheduledTask, SchedulerError>;

    async fn executions_for(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<TaskExecution>, SchedulerError>;

    async fn insert_rule(&self, rule: AutomationRule) -> Result<(), SchedulerError>;

    async fn rules_for_owner(&self, owner: Uuid) -> Result<Vec<AutomationRule>, SchedulerError>;

    async fn append_rule_execution(
        &self,
        execution: RuleExecution,
    ) -> Result<(), SchedulerError>;

    async fn rule_executions_for(
        &self,
        rule_id: Uuid,
    ) -> Result<Vec<RuleExecution>, SchedulerError>;
}

#[derive(Default)]
struct TaskState {
    tasks: HashMap<Uuid, ScheduledTask>,
    in_flight: HashSet<Uuid>,
    executions: Vec<TaskExecution>,
    rules: HashMap<Uuid, AutomationRule>,
    rule_executions: Vec<RuleExecution>,
}

/// In-memory task store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<TaskState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        self.state.write().await.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>, SchedulerError> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn tasks_for_owner(&self, owner: Uuid) -> Result<Vec<ScheduledTask>, SchedulerError> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let mut state = self.state.write().await;
        let mut due: Vec<ScheduledTask> = state
            .tasks
            .values()
            .filter(|t| {
                t.enabled
                    && !state.in_flight.contains(&t.id)
                    && t.next_run_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_run_at);
        due.truncate(limit);
        for task in &due {
            state.in_flight.insert(task.id);
        }
        Ok(due)
    }

    async fn claim_event_tasks(
        &self,
        owner: Uuid,
        event_name: &str,
    ) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let mut state = self.state.write().await;
        let matching: Vec<ScheduledTask> = state
            .tasks
            .values()
            .filter(|t| {
                t.enabled
                    && t.owner == owner
                    && !state.in_flight.contains(&t.id)
                    && t.trigger.matches_event(event_name)
            })
            .cloned()
            .collect();
        for task in &matching {
            state.in_flight.insert(task.id);
        }
        Ok(matching)
    }

    async fn complete_run(
        &self,
        task: ScheduledTask,
        execution: TaskExecution,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        state.in_flight.remove(&task.id);
        state.tasks.insert(task.id, task);
        state.executions.push(execution);
        Ok(())
    }

    async fn set_task_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<ScheduledTask, SchedulerError> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        task.enabled = enabled;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn executions_for(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<TaskExecution>, SchedulerError> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: AutomationRule) -> Result<(), SchedulerError> {
        self.state.write().await.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn rules_for_owner(
        &self,
        owner: Uuid,
    ) -> Result<Vec<AutomationRule>, SchedulerError> {
        let mut rules: Vec<AutomationRule> = self
            .state
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn append_rule_execution(
        &self,
        execution: RuleExecution,
    ) -> Result<(), SchedulerError> {
        self.state.write().await.rule_executions.push(execution);
        Ok(())
    }

    async fn rule_executions_for(
        &self,
        rule_id: Uuid,
    ) -> Result<Vec<RuleExecution>, SchedulerError> {
        Ok(self
            .state
            .read()
            .await
            .rule_executions
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect())
    }
}
