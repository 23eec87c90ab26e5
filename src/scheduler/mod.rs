//! Scheduler: recurring tasks and event-driven automation.
//!
//! `tick(now)` is the single time-based entry point and is safe to call from
//! multiple workers: the store's claim step guarantees at most one in-flight
//! firing per task. Failures retry with bounded exponential backoff; once a
//! task's consecutive failures exceed its retry budget it disables itself,
//! surfacing a terminal failure for operator attention instead of retrying
//! forever.

mod store;
mod trigger;
mod types;

pub use store::{InMemoryTaskStore, TaskStore};
pub use trigger::{Trigger, TriggerError};
pub use types::{
    AutomationRule, Condition, ConditionOp, Event, RuleExecution, RunStatus, ScheduledTask,
    SchedulerError, TaskExecution,
};

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{ActionCall, ActionRegistry};
use crate::config::CoreConfig;

/// Fires scheduled and automation-triggered work through the action registry.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    actions: Arc<ActionRegistry>,
    config: CoreConfig,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, actions: Arc<ActionRegistry>, config: CoreConfig) -> Self {
        Self {
            store,
            actions,
            config,
        }
    }

    /// Create an enabled task with its first firing time computed from the
    /// trigger.
    pub async fn schedule(
        &self,
        owner: Uuid,
        trigger: Trigger,
        action: ActionCall,
        max_retries: u32,
    ) -> Result<ScheduledTask, SchedulerError> {
        let task = ScheduledTask::new(owner, trigger, action, max_retries, Utc::now())?;
        self.store.insert_task(task.clone()).await?;
        info!(task = %task.id, %owner, action = %task.action.name, "task scheduled");
        Ok(task)
    }

    pub async fn task(&self, id: Uuid) -> Result<Option<ScheduledTask>, SchedulerError> {
        self.store.get_task(id).await
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<ScheduledTask, SchedulerError> {
        self.store.set_task_enabled(id, enabled).await
    }

    pub async fn executions(&self, task_id: Uuid) -> Result<Vec<TaskExecution>, SchedulerError> {
        self.store.executions_for(task_id).await
    }

    /// Fire every enabled task due at `now`.
    ///
    /// Safe under concurrent invocation: selection atomically claims each
    /// task, and a task whose previous firing has not recorded its execution
    /// yet is skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TaskExecution>, SchedulerError> {
        let claimed = self.store.claim_due(now, self.config.tick_batch).await?;
        let mut executions = Vec::with_capacity(claimed.len());
        for task in claimed {
            executions.push(self.run_claimed(task, now).await?);
        }
        Ok(executions)
    }

    /// Register an event-driven automation rule.
    pub async fn add_rule(
        &self,
        owner: Uuid,
        name: &str,
        trigger: Trigger,
        conditions: Vec<Condition>,
        actions: Vec<ActionCall>,
    ) -> Result<AutomationRule, SchedulerError> {
        let rule = AutomationRule {
            id: Uuid::new_v4(),
            owner,
            name: name.to_string(),
            trigger,
            conditions,
            actions,
            enabled: true,
            created_at: Utc::now(),
        };
        self.store.insert_rule(rule.clone()).await?;
        Ok(rule)
    }

    pub async fn rule_executions(
        &self,
        rule_id: Uuid,
    ) -> Result<Vec<RuleExecution>, SchedulerError> {
        self.store.rule_executions_for(rule_id).await
    }

    /// Check an inbound event against the owner's automation.
    ///
    /// Event-triggered tasks share the claim/run/record path with cron
    /// tasks; every enabled rule is then checked and gets one execution
    /// record per event, whether or not it matched.
    pub async fn evaluate(
        &self,
        owner: Uuid,
        event: &Event,
    ) -> Result<Vec<RuleExecution>, SchedulerError> {
        let now = Utc::now();
        for task in self.store.claim_event_tasks(owner, &event.name).await? {
            self.run_claimed(task, now).await?;
        }

        let mut results = Vec::new();
        for rule in self.store.rules_for_owner(owner).await? {
            if !rule.enabled {
                continue;
            }
            results.push(self.evaluate_rule(&rule, event).await?);
        }
        Ok(results)
    }

    async fn evaluate_rule(
        &self,
        rule: &AutomationRule,
        event: &Event,
    ) -> Result<RuleExecution, SchedulerError> {
        let matched = rule.trigger.matches_event(&event.name)
            && rule.conditions.iter().all(|c| c.holds(&event.payload));

        let mut output = None;
        let mut error = None;
        if matched {
            let mut outputs = Vec::new();
            for call in &rule.actions {
                match self.actions.dispatch(rule.owner, call).await {
                    Ok(value) => outputs.push(value),
                    Err(e) => {
                        // Remaining actions are skipped; the record carries
                        // the failure.
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
            output = Some(Value::Array(outputs));
            debug!(rule = %rule.id, event = %event.name, ok = error.is_none(), "rule fired");
        }

        let execution = RuleExecution {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            event: event.name.clone(),
            matched,
            success: error.is_none(),
            output,
            error,
            created_at: Utc::now(),
        };
        self.store.append_rule_execution(execution.clone()).await?;
        Ok(execution)
    }

    /// Run one claimed task and write back its post-run state. Exactly one
    /// execution record is produced per firing, success or failure.
    async fn run_claimed(
        &self,
        mut task: ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<TaskExecution, SchedulerError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = self.actions.dispatch(task.owner, &task.action).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        task.last_run_at = Some(now);
        let execution = match outcome {
            Ok(output) => {
                task.last_run_status = Some(RunStatus::Success);
                task.retry_count = 0;
                task.run_count += 1;
                task.next_run_at = task.trigger.next_run_at(now)?;
                TaskExecution {
                    id: Uuid::new_v4(),
                    task_id: task.id,
                    started_at,
                    duration_ms,
                    success: true,
                    output: Some(output),
                    error: None,
                }
            }
            Err(e) => {
                task.last_run_status = Some(RunStatus::Failure);
                task.retry_count += 1;
                task.failure_count += 1;
                if task.retry_count > task.max_retries {
                    // Out of retries: surface a terminal failure instead of
                    // retrying indefinitely.
                    task.enabled = false;
                    task.next_run_at = None;
                    warn!(task = %task.id, failures = task.failure_count, "task disabled after exhausting retries");
                } else {
                    task.next_run_at = Some(now + self.backoff(task.retry_count));
                }
                TaskExecution {
                    id: Uuid::new_v4(),
                    task_id: task.id,
                    started_at,
                    duration_ms,
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        };
        task.updated_at = Utc::now();
        self.store.complete_run(task, execution.clone()).await?;
        Ok(execution)
    }

    /// Exponential backoff for the nth consecutive failure, bounded by the
    /// configured cap.
    fn backoff(&self, retry_count: u32) -> chrono::Duration {
        let base = self.config.backoff_base.as_secs();
        let cap = self.config.backoff_cap.as_secs();
        let shift = retry_count.saturating_sub(1).min(20);
        let secs = base.saturating_mul(1u64 << shift).min(cap);
        chrono::Duration::seconds(secs as i64)
    }
}
