//! Core types for the agent system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::budget::BudgetError;
use crate::mission::MissionError;

/// Status of an agent in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Paused,
}

impl AgentStatus {
    /// Legal edges of the agent state machine.
    ///
    /// Pending agents may fail directly: a budget refusal terminates the run
    /// before any work starts.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Failed)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Paused)
                | (Paused, Active)
                | (Paused, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// A single node of a mission's agent tree.
///
/// The tree is a flat table keyed by id with a nullable parent reference:
/// a child is only created after its parent exists and is never re-parented,
/// so cycle-freedom holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub mission_id: Uuid,
    pub parent_agent_id: Option<Uuid>,
    /// Instruction text for this agent
    pub task: String,
    pub status: AgentStatus,
    /// Working context, scoped to this agent only
    #[serde(default)]
    pub memory: Map<String, Value>,
    /// Final structured output, set on completion
    pub result: Option<Value>,
    /// Why the agent failed, set on failure
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(mission_id: Uuid, parent_agent_id: Option<Uuid>, task: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mission_id,
            parent_agent_id,
            task: task.into(),
            status: AgentStatus::Pending,
            memory: Map::new(),
            result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How an agent's run ended.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Completed(Value),
    Failed(String),
}

/// Cost an agent's work declares before running, checked against the
/// per-task cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostEstimate {
    pub tokens: u64,
    pub cost_usd: f64,
}

impl CostEstimate {
    pub fn usd(cost_usd: f64) -> Self {
        Self {
            tokens: 0,
            cost_usd,
        }
    }
}

/// Result of an agent executing its task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: Uuid,
    pub success: bool,
    pub output: Value,
    /// Why execution failed, if it did
    pub failure: Option<String>,
}

/// Errors that can occur in agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Mission(#[from] MissionError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("Agent {0} was cancelled")]
    Cancelled(Uuid),
}
