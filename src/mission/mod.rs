//! Mission management: objectives decomposed into agent trees.
//!
//! A mission moves through planning → active ⇄ paused → {completed, failed};
//! every transition, spawn, and artifact write appends one entry to the
//! mission's append-only log, which is the audit trail surfaced to the user.

mod store;
mod types;

pub use store::{InMemoryMissionStore, MissionStore};
pub use types::{Mission, MissionError, MissionLogEntry, MissionStatus};

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::agents::Agent;

/// Mission manager facade over a pluggable store.
pub struct MissionManager {
    store: Arc<dyn MissionStore>,
}

impl MissionManager {
    pub fn new(store: Arc<dyn MissionStore>) -> Self {
        Self { store }
    }

    /// The underlying store, shared with the agent executor.
    pub fn store(&self) -> Arc<dyn MissionStore> {
        Arc::clone(&self.store)
    }

    /// Create a mission in planning with an empty agent tree.
    pub async fn create_mission(
        &self,
        owner: Uuid,
        objective: &str,
    ) -> Result<Mission, MissionError> {
        let mission = Mission::new(owner, objective);
        self.store.insert_mission(mission.clone()).await?;
        self.store
            .append_log(mission.id, "mission created", json!({ "objective": objective }))
            .await?;
        info!(mission = %mission.id, %owner, "mission created");
        Ok(mission)
    }

    /// The only way a mission leaves planning.
    pub async fn activate(&self, mission_id: Uuid) -> Result<Mission, MissionError> {
        self.transition(mission_id, MissionStatus::Active, "mission activated")
            .await
    }

    pub async fn pause_mission(&self, mission_id: Uuid) -> Result<Mission, MissionError> {
        self.transition(mission_id, MissionStatus::Paused, "mission paused")
            .await
    }

    pub async fn resume_mission(&self, mission_id: Uuid) -> Result<Mission, MissionError> {
        self.transition(mission_id, MissionStatus::Active, "mission resumed")
            .await
    }

    /// Terminal success transition, allowed from active or paused.
    pub async fn complete_mission(&self, mission_id: Uuid) -> Result<Mission, MissionError> {
        self.transition(mission_id, MissionStatus::Completed, "mission completed")
            .await
    }

    /// Terminal failure transition, allowed from active or paused.
    pub async fn fail_mission(&self, mission_id: Uuid) -> Result<Mission, MissionError> {
        self.transition(mission_id, MissionStatus::Failed, "mission failed")
            .await
    }

    async fn transition(
        &self,
        mission_id: Uuid,
        to: MissionStatus,
        message: &str,
    ) -> Result<Mission, MissionError> {
        let current = self
            .store
            .get_mission(mission_id)
            .await?
            .ok_or(MissionError::MissionNotFound(mission_id))?;
        let from = current.status;
        let mission = self.store.transition_mission(mission_id, from, to).await?;
        self.store
            .append_log(
                mission_id,
                message,
                json!({ "from": from.to_string(), "to": to.to_string() }),
            )
            .await?;
        info!(mission = %mission_id, %from, %to, "mission transition");
        Ok(mission)
    }

    /// Spawn an agent under the mission, optionally as a child of `parent`.
    pub async fn spawn_agent(
        &self,
        mission_id: Uuid,
        parent: Option<Uuid>,
        task: &str,
    ) -> Result<Agent, MissionError> {
        let agent = Agent::new(mission_id, parent, task);
        let agent = self.store.insert_agent(agent).await?;
        self.store
            .append_log(
                mission_id,
                "agent spawned",
                json!({
                    "agent": agent.id.to_string(),
                    "parent": parent.map(|p| p.to_string()),
                    "task": task,
                }),
            )
            .await?;
        Ok(agent)
    }

    /// Merge a named output into the mission's artifact map.
    pub async fn record_artifact(
        &self,
        mission_id: Uuid,
        key: &str,
        value: Value,
    ) -> Result<Mission, MissionError> {
        let mission = self
            .store
            .record_artifact(mission_id, key, value)
            .await?;
        self.store
            .append_log(mission_id, "artifact recorded", json!({ "key": key }))
            .await?;
        Ok(mission)
    }

    /// Merge entries into the context shared by the mission's agents.
    pub async fn merge_context(
        &self,
        mission_id: Uuid,
        entries: Map<String, Value>,
    ) -> Result<Mission, MissionError> {
        self.store.merge_context(mission_id, entries).await
    }

    pub async fn mission(&self, mission_id: Uuid) -> Result<Option<Mission>, MissionError> {
        self.store.get_mission(mission_id).await
    }

    pub async fn agents(&self, mission_id: Uuid) -> Result<Vec<Agent>, MissionError> {
        self.store.agents_for_mission(mission_id).await
    }

    pub async fn mission_log(
        &self,
        mission_id: Uuid,
    ) -> Result<Vec<MissionLogEntry>, MissionError> {
        self.store.log_for_mission(mission_id).await
    }

    /// Active missions untouched for at least `older_than`, for operator
    /// recovery sweeps.
    pub async fn stale_active_missions(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Mission>, MissionError> {
        self.store
            .stale_active_missions(Utc::now() - older_than)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentOutcome, AgentStatus};

    fn manager() -> MissionManager {
        MissionManager::new(Arc::new(InMemoryMissionStore::new()))
    }

    #[tokio::test]
    async fn lifecycle_follows_the_state_machine() {
        let manager = manager();
        let owner = Uuid::new_v4();

        let mission = manager.create_mission(owner, "summarize inbox").await.unwrap();
        assert_eq!(mission.status, MissionStatus::Planning);
        assert_eq!(mission.agent_count, 0);

        manager.activate(mission.id).await.unwrap();
        manager.pause_mission(mission.id).await.unwrap();
        manager.resume_mission(mission.id).await.unwrap();
        let done = manager.complete_mission(mission.id).await.unwrap();

        assert_eq!(done.status, MissionStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let manager = manager();
        let mission = manager
            .create_mission(Uuid::new_v4(), "x")
            .await
            .unwrap();

        // planning has a single outgoing edge: activate.
        let err = manager.complete_mission(mission.id).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { .. }));
        let err = manager.pause_mission(mission.id).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { .. }));

        // Terminal states have no outgoing edges.
        manager.activate(mission.id).await.unwrap();
        manager.fail_mission(mission.id).await.unwrap();
        let err = manager.resume_mission(mission.id).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn stale_expectation_is_rejected_for_retry() {
        let manager = manager();
        let store = manager.store();
        let mission = manager.create_mission(Uuid::new_v4(), "x").await.unwrap();
        manager.activate(mission.id).await.unwrap();

        // A second worker still holding the planning snapshot loses the race.
        let err = store
            .transition_mission(mission.id, MissionStatus::Planning, MissionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, MissionError::StaleStatus { .. }));
    }

    #[tokio::test]
    async fn agent_count_tracks_spawns_and_tree_stays_mission_local() {
        let manager = manager();
        let mission = manager.create_mission(Uuid::new_v4(), "x").await.unwrap();
        manager.activate(mission.id).await.unwrap();

        let root = manager.spawn_agent(mission.id, None, "root").await.unwrap();
        let child = manager
            .spawn_agent(mission.id, Some(root.id), "child")
            .await
            .unwrap();
        manager
            .spawn_agent(mission.id, Some(child.id), "grandchild")
            .await
            .unwrap();

        let mission = manager.mission(mission.id).await.unwrap().unwrap();
        let agents = manager.agents(mission.id).await.unwrap();
        assert_eq!(mission.agent_count, 3);
        assert_eq!(agents.len() as u64, mission.agent_count);

        // Every parent chain terminates and stays within the mission.
        for agent in &agents {
            let mut hops = 0;
            let mut cursor = agent.parent_agent_id;
            while let Some(parent_id) = cursor {
                let parent = agents.iter().find(|a| a.id == parent_id).expect("parent");
                assert_eq!(parent.mission_id, agent.mission_id);
                cursor = parent.parent_agent_id;
                hops += 1;
                assert!(hops <= agents.len(), "cycle in parent chain");
            }
        }
    }

    #[tokio::test]
    async fn foreign_or_unknown_parent_is_invalid() {
        let manager = manager();
        let mission_a = manager.create_mission(Uuid::new_v4(), "a").await.unwrap();
        let mission_b = manager.create_mission(Uuid::new_v4(), "b").await.unwrap();
        let foreign = manager.spawn_agent(mission_a.id, None, "root").await.unwrap();

        let err = manager
            .spawn_agent(mission_b.id, Some(foreign.id), "child")
            .await
            .unwrap_err();
        assert!(matches!(err, MissionError::InvalidParent { .. }));

        let err = manager
            .spawn_agent(mission_b.id, Some(Uuid::new_v4()), "child")
            .await
            .unwrap_err();
        assert!(matches!(err, MissionError::InvalidParent { .. }));

        // The failed spawns left the count untouched.
        let mission_b = manager.mission(mission_b.id).await.unwrap().unwrap();
        assert_eq!(mission_b.agent_count, 0);
    }

    #[tokio::test]
    async fn artifacts_are_last_write_wins() {
        let manager = manager();
        let mission = manager.create_mission(Uuid::new_v4(), "x").await.unwrap();

        manager
            .record_artifact(mission.id, "report", json!("draft"))
            .await
            .unwrap();
        let mission = manager
            .record_artifact(mission.id, "report", json!("final"))
            .await
            .unwrap();
        assert_eq!(mission.artifacts.get("report"), Some(&json!("final")));
    }

    #[tokio::test]
    async fn failed_children_do_not_move_the_mission() {
        let manager = manager();
        let store = manager.store();
        let mission = manager.create_mission(Uuid::new_v4(), "x").await.unwrap();
        manager.activate(mission.id).await.unwrap();

        let a = manager.spawn_agent(mission.id, None, "a").await.unwrap();
        let b = manager.spawn_agent(mission.id, None, "b").await.unwrap();
        store
            .transition_agent(a.id, AgentStatus::Pending, AgentStatus::Active)
            .await
            .unwrap();
        store
            .finish_agent(a.id, AgentStatus::Active, AgentOutcome::Failed("boom".into()))
            .await
            .unwrap();
        store
            .transition_agent(b.id, AgentStatus::Pending, AgentStatus::Active)
            .await
            .unwrap();
        store
            .finish_agent(b.id, AgentStatus::Active, AgentOutcome::Completed(json!(1)))
            .await
            .unwrap();

        // Partial failure is reported, not masked: the mission stays active
        // until an explicit terminal call.
        let mission = manager.mission(mission.id).await.unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Active);

        manager.complete_mission(mission.id).await.unwrap();
    }

    #[tokio::test]
    async fn every_transition_appends_one_log_entry() {
        let manager = manager();
        let mission = manager.create_mission(Uuid::new_v4(), "x").await.unwrap();
        manager.activate(mission.id).await.unwrap();
        manager.pause_mission(mission.id).await.unwrap();
        manager.resume_mission(mission.id).await.unwrap();
        manager.complete_mission(mission.id).await.unwrap();

        let log = manager.mission_log(mission.id).await.unwrap();
        let messages: Vec<&str> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "mission created",
                "mission activated",
                "mission paused",
                "mission resumed",
                "mission completed",
            ]
        );
    }
}
