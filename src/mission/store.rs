//! Mission and agent storage with pluggable backends.
//!
//! The store is the serialization point for entity state: status changes are
//! compare-and-swap against an expected pre-state, and agent inserts update
//! the owning mission's `agent_count` in the same lock acquisition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agents::{Agent, AgentOutcome, AgentStatus};

use super::types::{Mission, MissionError, MissionLogEntry, MissionStatus};

/// Mission store trait - implemented by all storage backends.
#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn insert_mission(&self, mission: Mission) -> Result<(), MissionError>;

    async fn get_mission(&self, id: Uuid) -> Result<Option<Mission>, MissionError>;

    async fn missions_for_owner(&self, owner: Uuid) -> Result<Vec<Mission>, MissionError>;

    /// Compare-and-swap status transition.
    ///
    /// Fails with `InvalidTransition` for an illegal edge and `StaleStatus`
    /// when the stored status no longer matches `expected` (the caller
    /// re-reads and retries). Stamps `updated_at`, and `completed_at` on a
    /// terminal transition.
    async fn transition_mission(
        &self,
        id: Uuid,
        expected: MissionStatus,
        next: MissionStatus,
    ) -> Result<Mission, MissionError>;

    /// Merge entries into the mission's shared context.
    async fn merge_context(
        &self,
        id: Uuid,
        entries: Map<String, Value>,
    ) -> Result<Mission, MissionError>;

    /// Merge one artifact, last write wins per key.
    async fn record_artifact(
        &self,
        id: Uuid,
        key: &str,
        value: Value,
    ) -> Result<Mission, MissionError>;

    /// Insert an agent under its mission and bump `agent_count` atomically.
    ///
    /// Fails with `InvalidParent` when the parent reference is missing from
    /// the store or belongs to a different mission.
    async fn insert_agent(&self, agent: Agent) -> Result<Agent, MissionError>;

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, MissionError>;

    async fn agents_for_mission(&self, mission_id: Uuid) -> Result<Vec<Agent>, MissionError>;

    /// Pending agents under the owner's active missions, oldest first.
    async fn pending_agents_for_owner(&self, owner: Uuid) -> Result<Vec<Agent>, MissionError>;

    /// Compare-and-swap agent status transition (same contract as missions).
    async fn transition_agent(
        &self,
        id: Uuid,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<Agent, MissionError>;

    /// Terminal transition carrying the run's outcome payload.
    async fn finish_agent(
        &self,
        id: Uuid,
        expected: AgentStatus,
        outcome: AgentOutcome,
    ) -> Result<Agent, MissionError>;

    /// Merge entries into the agent's private working memory.
    async fn merge_agent_memory(
        &self,
        id: Uuid,
        entries: Map<String, Value>,
    ) -> Result<Agent, MissionError>;

    /// Append one audit-log entry for the mission.
    async fn append_log(
        &self,
        mission_id: Uuid,
        message: &str,
        metadata: Value,
    ) -> Result<MissionLogEntry, MissionError>;

    async fn log_for_mission(
        &self,
        mission_id: Uuid,
    ) -> Result<Vec<MissionLogEntry>, MissionError>;

    /// Active missions untouched since `cutoff`, for recovery sweeps.
    async fn stale_active_missions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Mission>, MissionError>;
}

#[derive(Default)]
struct MissionState {
    missions: HashMap<Uuid, Mission>,
    agents: HashMap<Uuid, Agent>,
    log: Vec<MissionLogEntry>,
    next_seq: u64,
}

/// In-memory mission store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryMissionStore {
    state: Arc<RwLock<MissionState>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn insert_mission(&self, mission: Mission) -> Result<(), MissionError> {
        self.state
            .write()
            .await
            .missions
            .insert(mission.id, mission);
        Ok(())
    }

    async fn get_mission(&self, id: Uuid) -> Result<Option<Mission>, MissionError> {
        Ok(self.state.read().await.missions.get(&id).cloned())
    }

    async fn missions_for_owner(&self, owner: Uuid) -> Result<Vec<Mission>, MissionError> {
        let mut missions: Vec<Mission> = self
            .state
            .read()
            .await
            .missions
            .values()
            .filter(|m| m.owner == owner)
            .cloned()
            .collect();
        missions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(missions)
    }

    async fn transition_mission(
        &self,
        id: Uuid,
        expected: MissionStatus,
        next: MissionStatus,
    ) -> Result<Mission, MissionError> {
        if !expected.can_transition_to(next) {
            return Err(MissionError::invalid_transition(expected, next));
        }
        let mut state = self.state.write().await;
        let mission = state
            .missions
            .get_mut(&id)
            .ok_or(MissionError::MissionNotFound(id))?;
        if mission.status != expected {
            return Err(MissionError::stale_status(expected, mission.status));
        }
        mission.status = next;
        let now = Utc::now();
        mission.updated_at = now;
        if next.is_terminal() {
            mission.completed_at = Some(now);
        }
        Ok(mission.clone())
    }

    async fn merge_context(
        &self,
        id: Uuid,
        entries: Map<String, Value>,
    ) -> Result<Mission, MissionError> {
        let mut state = self.state.write().await;
        let mission = state
            .missions
            .get_mut(&id)
            .ok_or(MissionError::MissionNotFound(id))?;
        mission.context.extend(entries);
        mission.updated_at = Utc::now();
        Ok(mission.clone())
    }

    async fn record_artifact(
        &self,
        id: Uuid,
        key: &str,
        value: Value,
    ) -> Result<Mission, MissionError> {
        let mut state = self.state.write().await;
        let mission = state
            .missions
            .get_mut(&id)
            .ok_or(MissionError::MissionNotFound(id))?;
        mission.artifacts.insert(key.to_string(), value);
        mission.updated_at = Utc::now();
        Ok(mission.clone())
    }

    async fn insert_agent(&self, agent: Agent) -> Result<Agent, MissionError> {
        let mut state = self.state.write().await;
        if !state.missions.contains_key(&agent.mission_id) {
            return Err(MissionError::MissionNotFound(agent.mission_id));
        }
        if let Some(parent_id) = agent.parent_agent_id {
            let belongs = state
                .agents
                .get(&parent_id)
                .map(|p| p.mission_id == agent.mission_id)
                .unwrap_or(false);
            if !belongs {
                return Err(MissionError::InvalidParent {
                    mission: agent.mission_id,
                    parent: parent_id,
                });
            }
        }
        let mission = state
            .missions
            .get_mut(&agent.mission_id)
            .ok_or(MissionError::MissionNotFound(agent.mission_id))?;
        mission.agent_count += 1;
        mission.updated_at = Utc::now();
        state.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, MissionError> {
        Ok(self.state.read().await.agents.get(&id).cloned())
    }

    async fn agents_for_mission(&self, mission_id: Uuid) -> Result<Vec<Agent>, MissionError> {
        let mut agents: Vec<Agent> = self
            .state
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.mission_id == mission_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn pending_agents_for_owner(&self, owner: Uuid) -> Result<Vec<Agent>, MissionError> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|a| {
                a.status == AgentStatus::Pending
                    && state
                        .missions
                        .get(&a.mission_id)
                        .map(|m| m.owner == owner && m.status == MissionStatus::Active)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn transition_agent(
        &self,
        id: Uuid,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<Agent, MissionError> {
        if !expected.can_transition_to(next) {
            return Err(MissionError::invalid_transition(expected, next));
        }
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or(MissionError::AgentNotFound(id))?;
        if agent.status != expected {
            return Err(MissionError::stale_status(expected, agent.status));
        }
        agent.status = next;
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    async fn finish_agent(
        &self,
        id: Uuid,
        expected: AgentStatus,
        outcome: AgentOutcome,
    ) -> Result<Agent, MissionError> {
        let next = match outcome {
            AgentOutcome::Completed(_) => AgentStatus::Completed,
            AgentOutcome::Failed(_) => AgentStatus::Failed,
        };
        if !expected.can_transition_to(next) {
            return Err(MissionError::invalid_transition(expected, next));
        }
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or(MissionError::AgentNotFound(id))?;
        if agent.status != expected {
            return Err(MissionError::stale_status(expected, agent.status));
        }
        agent.status = next;
        agent.updated_at = Utc::now();
        match outcome {
            AgentOutcome::Completed(result) => agent.result = Some(result),
            AgentOutcome::Failed(reason) => agent.failure_reason = Some(reason),
        }
        Ok(agent.clone())
    }

    async fn merge_agent_memory(
        &self,
        id: Uuid,
        entries: Map<String, Value>,
    ) -> Result<Agent, MissionError> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or(MissionError::AgentNotFound(id))?;
        agent.memory.extend(entries);
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    async fn append_log(
        &self,
        mission_id: Uuid,
        message: &str,
        metadata: Value,
    ) -> Result<MissionLogEntry, MissionError> {
        let mut state = self.state.write().await;
        if !state.missions.contains_key(&mission_id) {
            return Err(MissionError::MissionNotFound(mission_id));
        }
        state.next_seq += 1;
        let entry = MissionLogEntry {
            seq: state.next_seq,
            mission_id,
            message: message.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        state.log.push(entry.clone());
        Ok(entry)
    }

    async fn log_for_mission(
        &self,
        mission_id: Uuid,
    ) -> Result<Vec<MissionLogEntry>, MissionError> {
        Ok(self
            .state
            .read()
            .await
            .log
            .iter()
            .filter(|e| e.mission_id == mission_id)
            .cloned()
            .collect())
    }

    async fn stale_active_missions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Mission>, MissionError> {
        Ok(self
            .state
            .read()
            .await
            .missions
            .values()
            .filter(|m| m.status == MissionStatus::Active && m.updated_at < cutoff)
            .cloned()
            .collect())
    }
}
