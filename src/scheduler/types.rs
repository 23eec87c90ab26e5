//! Types for scheduled tasks and automation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actions::ActionCall;

use super::trigger::{Trigger, TriggerError};

/// Outcome of a task's most recent firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Recurring or triggered work owned by a user.
///
/// Created enabled; disabled tasks are never selected for firing, and a task
/// whose consecutive failures exceed `max_retries` disables itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub owner: Uuid,
    pub trigger: Trigger,
    pub action: ActionCall,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u64,
    pub max_retries: u32,
    /// Consecutive failures since the last success
    pub retry_count: u32,
    pub last_run_status: Option<RunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(
        owner: Uuid,
        trigger: Trigger,
        action: ActionCall,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, TriggerError> {
        let next_run_at = trigger.next_run_at(now)?;
        Ok(Self {
            id: Uuid::new_v4(),
            owner,
            trigger,
            action,
            enabled: true,
            last_run_at: None,
            next_run_at,
            run_count: 0,
            failure_count: 0,
            max_retries,
            retry_count: 0,
            last_run_status: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Immutable record of one task firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Comparison applied to one field of an event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Ne,
    Contains,
    Exists,
    Gt,
    Lt,
}

/// One condition of an automation rule; all of a rule's conditions must hold
/// for the rule to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the event payload, e.g. "message.subject"
    pub path: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Option<Value>,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: ConditionOp, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    /// Whether this condition holds for the payload. A missing field fails
    /// every comparison except its absence under `Exists`.
    pub fn holds(&self, payload: &Value) -> bool {
        let found = lookup(payload, &self.path);
        match self.op {
            ConditionOp::Exists => found.is_some(),
            ConditionOp::Eq => matches!((found, &self.value), (Some(v), Some(want)) if v == want),
            ConditionOp::Ne => matches!((found, &self.value), (Some(v), Some(want)) if v != want),
            ConditionOp::Contains => match (found, &self.value) {
                (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle),
                (Some(Value::Array(items)), Some(want)) => items.contains(want),
                _ => false,
            },
            ConditionOp::Gt => compare(found, &self.value, |a, b| a > b),
            ConditionOp::Lt => compare(found, &self.value, |a, b| a < b),
        }
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |v, key| v.get(key))
}

fn compare(found: Option<&Value>, want: &Option<Value>, cmp: fn(f64, f64) -> bool) -> bool {
    match (found.and_then(Value::as_f64), want.as_ref().and_then(Value::as_f64)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Event-driven counterpart to a scheduled task: same action vocabulary,
/// fired by `evaluate` when its trigger and conditions match an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub trigger: Trigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionCall>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Record of one rule checked against one event.
///
/// `matched` distinguishes rules that were checked but did not fire from
/// rules that fired and then failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecution {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub event: String,
    pub matched: bool,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An inbound event handed to `evaluate` by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Errors in scheduler operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}
