//! Types for missions and their audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Mission status.
///
/// State machine: planning → active ⇄ paused → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Planning,
    Active,
    Paused,
    Completed,
    Failed,
}

impl MissionStatus {
    /// Legal edges of the mission state machine.
    pub fn can_transition_to(self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        matches!(
            (self, next),
            (Planning, Active)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Failed)
                | (Paused, Active)
                | (Paused, Completed)
                | (Paused, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(Self::Planning),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid mission status: {}", s)),
        }
    }
}

/// A user objective decomposed into a tree of agents.
///
/// The mission is the unit of user-visible progress: it owns its agent tree,
/// shares `context` across those agents, and collects named `artifacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub owner: Uuid,
    pub objective: String,
    pub status: MissionStatus,
    /// Structured key/value state shared across the mission's agents
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Named outputs, last write wins per key
    #[serde(default)]
    pub artifacts: Map<String, Value>,
    /// Number of agents spawned under this mission
    pub agent_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Mission {
    pub fn new(owner: Uuid, objective: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            objective: objective.into(),
            status: MissionStatus::Planning,
            context: Map::new(),
            artifacts: Map::new(),
            agent_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// One entry of a mission's append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionLogEntry {
    pub seq: u64,
    pub mission_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Errors in mission and agent-tree operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MissionError {
    #[error("Mission not found: {0}")]
    MissionNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Stale status: expected {expected}, found {actual}")]
    StaleStatus { expected: String, actual: String },

    #[error("Parent agent {parent} does not belong to mission {mission}")]
    InvalidParent { mission: Uuid, parent: Uuid },
}

impl MissionError {
    pub fn invalid_transition(
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn stale_status(
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::StaleStatus {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
