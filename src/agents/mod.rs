//! Agent execution.
//!
//! The executor runs one agent's task to completion or failure. The task is
//! an opaque unit of work that may consult the memory store, charge the
//! budget ledger, run a sandboxed plugin, spawn child agents, or call out to
//! inference — all through the [`AgentContext`] it is handed. A child's
//! failure is returned to the parent as a value, never propagated
//! automatically: partial failure is an inspectable outcome.

mod types;

pub use types::{
    Agent, AgentError, AgentOutcome, AgentResult, AgentStatus, CostEstimate,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::{Action, ActionError, PROCESS_QUEUE};
use crate::budget::{BudgetLedger, UsageTotals};
use crate::infer::{InferError, Inference};
use crate::memory::MemoryService;
use crate::mission::{MissionError, MissionManager};
use crate::sandbox::{PluginExecution, SandboxError, SandboxRunner};

const CANCELLED_REASON: &str = "cancelled";

/// The opaque unit of work an agent performs.
#[async_trait]
pub trait AgentWork: Send + Sync {
    /// Upper-bound cost declared before the run, checked against the owner's
    /// caps. A refused check fails the agent before any spend.
    fn cost_estimate(&self) -> CostEstimate {
        CostEstimate::default()
    }

    async fn execute(&self, ctx: &AgentContext) -> anyhow::Result<Value>;
}

/// Runs agents against the mission tree, budget ledger, memory store, and
/// plugin sandbox.
pub struct AgentExecutor {
    missions: Arc<MissionManager>,
    budget: Arc<BudgetLedger>,
    memory: Arc<MemoryService>,
    sandbox: Arc<SandboxRunner>,
    inference: Arc<dyn Inference>,
}

impl AgentExecutor {
    pub fn new(
        missions: Arc<MissionManager>,
        budget: Arc<BudgetLedger>,
        memory: Arc<MemoryService>,
        sandbox: Arc<SandboxRunner>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        Self {
            missions,
            budget,
            memory,
            sandbox,
            inference,
        }
    }

    /// Run a pending agent to completion or failure.
    ///
    /// Transitions pending → active, executes the work, then active →
    /// completed with the result payload or active → failed with the error
    /// payload. The work's own failure is returned as an unsuccessful
    /// [`AgentResult`]; `Err` is reserved for refusals (budget), cancellation,
    /// and structural problems.
    pub async fn run(
        self: Arc<Self>,
        agent_id: Uuid,
        work: Arc<dyn AgentWork>,
        cancel: CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        let store = self.missions.store();
        let agent = store
            .get_agent(agent_id)
            .await?
            .ok_or(MissionError::AgentNotFound(agent_id))?;
        let mission = store
            .get_mission(agent.mission_id)
            .await?
            .ok_or(MissionError::MissionNotFound(agent.mission_id))?;
        let owner = mission.owner;

        // Consult the ledger before any cost is incurred: a run the per-task
        // cap cannot fit is refused with no spend recorded.
        let estimate = work.cost_estimate();
        if estimate.cost_usd > 0.0 {
            if let Err(e) = self
                .budget
                .check(owner, Some(agent_id), estimate.cost_usd)
                .await
            {
                let reason = e.to_string();
                store
                    .finish_agent(
                        agent_id,
                        AgentStatus::Pending,
                        AgentOutcome::Failed(reason.clone()),
                    )
                    .await?;
                store
                    .append_log(
                        agent.mission_id,
                        "agent refused",
                        json!({ "agent": agent_id.to_string(), "reason": reason }),
                    )
                    .await?;
                warn!(agent = %agent_id, %owner, "agent run refused by budget");
                return Err(AgentError::Budget(e));
            }
        }

        store
            .transition_agent(agent_id, AgentStatus::Pending, AgentStatus::Active)
            .await?;
        store
            .append_log(
                agent.mission_id,
                "agent started",
                json!({ "agent": agent_id.to_string() }),
            )
            .await?;

        let ctx = AgentContext {
            executor: Arc::clone(&self),
            agent_id,
            mission_id: agent.mission_id,
            owner,
            cancel: cancel.clone(),
        };

        // The work future is the only suspension region; racing it against
        // the token covers every await point inside it.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = work.execute(&ctx) => Some(result),
        };

        match outcome {
            None => {
                store
                    .finish_agent(
                        agent_id,
                        AgentStatus::Active,
                        AgentOutcome::Failed(CANCELLED_REASON.to_string()),
                    )
                    .await?;
                store
                    .append_log(
                        agent.mission_id,
                        "agent cancelled",
                        json!({ "agent": agent_id.to_string() }),
                    )
                    .await?;
                Err(AgentError::Cancelled(agent_id))
            }
            Some(Ok(output)) => {
                store
                    .finish_agent(
                        agent_id,
                        AgentStatus::Active,
                        AgentOutcome::Completed(output.clone()),
                    )
                    .await?;
                store
                    .append_log(
                        agent.mission_id,
                        "agent completed",
                        json!({ "agent": agent_id.to_string() }),
                    )
                    .await?;
                info!(agent = %agent_id, "agent completed");
                Ok(AgentResult {
                    agent_id,
                    success: true,
                    output,
                    failure: None,
                })
            }
            Some(Err(e)) => {
                let reason = e.to_string();
                store
                    .finish_agent(
                        agent_id,
                        AgentStatus::Active,
                        AgentOutcome::Failed(reason.clone()),
                    )
                    .await?;
                store
                    .append_log(
                        agent.mission_id,
                        "agent failed",
                        json!({ "agent": agent_id.to_string(), "reason": reason }),
                    )
                    .await?;
                warn!(agent = %agent_id, reason = %reason, "agent failed");
                Ok(AgentResult {
                    agent_id,
                    success: false,
                    output: Value::Null,
                    failure: Some(reason),
                })
            }
        }
    }

    pub async fn pause(&self, agent_id: Uuid) -> Result<Agent, AgentError> {
        Ok(self
            .missions
            .store()
            .transition_agent(agent_id, AgentStatus::Active, AgentStatus::Paused)
            .await?)
    }

    pub async fn resume(&self, agent_id: Uuid) -> Result<Agent, AgentError> {
        Ok(self
            .missions
            .store()
            .transition_agent(agent_id, AgentStatus::Paused, AgentStatus::Active)
            .await?)
    }
}

/// Capabilities handed to an agent's work.
///
/// Everything the work may touch flows through here: there is no ambient
/// access to stores or providers.
pub struct AgentContext {
    executor: Arc<AgentExecutor>,
    agent_id: Uuid,
    mission_id: Uuid,
    owner: Uuid,
    cancel: CancellationToken,
}

impl AgentContext {
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn mission_id(&self) -> Uuid {
        self.mission_id
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// The run's cancellation token, for work that wants to poll it at finer
    /// granularity than the executor's top-level race.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The owner's long-term memory.
    pub fn memory(&self) -> &MemoryService {
        &self.executor.memory
    }

    /// Record spend for this agent's run, check-then-charge atomically.
    pub async fn charge(
        &self,
        operation: &str,
        tokens: u64,
        cost_usd: f64,
    ) -> Result<UsageTotals, AgentError> {
        let (_, totals) = self
            .executor
            .budget
            .charge_checked(self.owner, operation, Some(self.agent_id), tokens, cost_usd)
            .await?;
        Ok(totals)
    }

    /// Call the opaque inference capability.
    pub async fn infer(&self, prompt: &str, model_id: &str) -> Result<String, InferError> {
        self.executor.inference.infer(prompt, model_id).await
    }

    /// Run a sandboxed plugin.
    pub async fn run_plugin(
        &self,
        plugin_id: Uuid,
        input: Value,
    ) -> Result<PluginExecution, SandboxError> {
        self.executor.sandbox.execute(plugin_id, input).await
    }

    /// Spawn a child agent under this agent in the same mission.
    pub async fn spawn_child(&self, task: &str) -> Result<Agent, MissionError> {
        self.executor
            .missions
            .spawn_agent(self.mission_id, Some(self.agent_id), task)
            .await
    }

    /// Run a child agent and return its result as a value.
    ///
    /// The child inherits a child token, so cancelling the parent cancels the
    /// subtree; a failed child is reported back, and whether that fails the
    /// parent is the parent's decision.
    pub async fn run_child(
        &self,
        child_id: Uuid,
        work: Arc<dyn AgentWork>,
    ) -> Result<AgentResult, AgentError> {
        Arc::clone(&self.executor)
            .run(child_id, work, self.cancel.child_token())
            .await
    }

    /// Merge entries into this agent's private working memory.
    pub async fn save_memory(&self, entries: Map<String, Value>) -> Result<Agent, MissionError> {
        self.executor
            .missions
            .store()
            .merge_agent_memory(self.agent_id, entries)
            .await
    }

    /// Merge a named output into the mission's artifacts.
    pub async fn record_artifact(&self, key: &str, value: Value) -> Result<(), MissionError> {
        self.executor
            .missions
            .record_artifact(self.mission_id, key, value)
            .await
            .map(|_| ())
    }
}

/// Derives runnable work from a pending agent's instruction text.
pub trait WorkResolver: Send + Sync {
    fn resolve(&self, agent: &Agent) -> Arc<dyn AgentWork>;
}

/// `agents.process_queue` as a dispatchable action: drains pending agents of
/// the owner's active missions. Each agent's run is claimed through the
/// pending → active transition, so an agent picked up by a concurrent drain
/// is skipped and the action is safe to retry.
pub struct ProcessQueueAction {
    executor: Arc<AgentExecutor>,
    resolver: Arc<dyn WorkResolver>,
}

impl ProcessQueueAction {
    pub fn new(executor: Arc<AgentExecutor>, resolver: Arc<dyn WorkResolver>) -> Self {
        Self { executor, resolver }
    }
}

#[async_trait]
impl Action for ProcessQueueAction {
    fn name(&self) -> &str {
        PROCESS_QUEUE
    }

    async fn run(&self, owner: Uuid, _params: &Value) -> Result<Value, ActionError> {
        let store = self.executor.missions.store();
        let pending = store
            .pending_agents_for_owner(owner)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;

        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut skipped = 0u64;
        for agent in pending {
            let work = self.resolver.resolve(&agent);
            match Arc::clone(&self.executor)
                .run(agent.id, work, CancellationToken::new())
                .await
            {
                Ok(result) if result.success => completed += 1,
                Ok(_) => failed += 1,
                // Claimed by a concurrent drain between the query and the run.
                Err(AgentError::Mission(MissionError::StaleStatus { .. })) => skipped += 1,
                Err(_) => failed += 1,
            }
        }
        Ok(json!({ "completed": completed, "failed": failed, "skipped": skipped }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{micro_usd, BudgetError, InMemoryLedgerStore, MicroUsd, UsageLimit};
    use crate::memory::InMemoryFactStore;
    use crate::mission::{InMemoryMissionStore, MissionStatus};
    use crate::sandbox::{InMemoryPluginStore, PluginRuntime, SandboxError, SandboxOutput};
    use std::time::Duration;

    struct CannedInference;

    #[async_trait]
    impl Inference for CannedInference {
        async fn infer(&self, _prompt: &str, _model_id: &str) -> Result<String, InferError> {
            Ok("summary: all clear".to_string())
        }
    }

    struct NullRuntime;

    #[async_trait]
    impl PluginRuntime for NullRuntime {
        async fn invoke(
            &self,
            _plugin: &crate::sandbox::Plugin,
            _input: Value,
        ) -> Result<SandboxOutput, SandboxError> {
            Ok(SandboxOutput {
                result: Value::Null,
                logs: Vec::new(),
            })
        }
    }

    struct Harness {
        executor: Arc<AgentExecutor>,
        missions: Arc<MissionManager>,
        budget: Arc<BudgetLedger>,
    }

    fn harness() -> Harness {
        let missions = Arc::new(MissionManager::new(Arc::new(InMemoryMissionStore::new())));
        let budget = Arc::new(BudgetLedger::new(Arc::new(InMemoryLedgerStore::new())));
        let memory = Arc::new(MemoryService::new(Arc::new(InMemoryFactStore::new())));
        let sandbox = Arc::new(SandboxRunner::new(
            Arc::new(InMemoryPluginStore::new()),
            Arc::new(NullRuntime),
            Duration::from_secs(5),
        ));
        let executor = Arc::new(AgentExecutor::new(
            Arc::clone(&missions),
            Arc::clone(&budget),
            memory,
            sandbox,
            Arc::new(CannedInference),
        ));
        Harness {
            executor,
            missions,
            budget,
        }
    }

    async fn active_mission_with_agent(h: &Harness) -> (Uuid, Agent) {
        let owner = Uuid::new_v4();
        let mission = h.missions.create_mission(owner, "digest inbox").await.unwrap();
        h.missions.activate(mission.id).await.unwrap();
        let agent = h
            .missions
            .spawn_agent(mission.id, None, "summarize")
            .await
            .unwrap();
        (owner, agent)
    }

    /// Charges, consults inference, saves working memory, records an artifact.
    struct Summarize;

    #[async_trait]
    impl AgentWork for Summarize {
        fn cost_estimate(&self) -> CostEstimate {
            CostEstimate::usd(0.05)
        }

        async fn execute(&self, ctx: &AgentContext) -> anyhow::Result<Value> {
            let summary = ctx.infer("summarize the inbox", "fast-model").await?;
            ctx.charge("inference", 420, 0.02).await?;
            let mut scratch = Map::new();
            scratch.insert("summary".to_string(), json!(summary));
            ctx.save_memory(scratch).await?;
            ctx.record_artifact("summary", json!(summary)).await?;
            Ok(json!({ "summary": summary }))
        }
    }

    struct Explodes;

    #[async_trait]
    impl AgentWork for Explodes {
        async fn execute(&self, _ctx: &AgentContext) -> anyhow::Result<Value> {
            anyhow::bail!("upstream returned garbage")
        }
    }

    struct Hangs;

    #[async_trait]
    impl AgentWork for Hangs {
        async fn execute(&self, _ctx: &AgentContext) -> anyhow::Result<Value> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    /// Spawns a failing child and completes anyway.
    struct DelegatesAndTolerates;

    #[async_trait]
    impl AgentWork for DelegatesAndTolerates {
        async fn execute(&self, ctx: &AgentContext) -> anyhow::Result<Value> {
            let child = ctx.spawn_child("fetch the feed").await?;
            let result = ctx.run_child(child.id, Arc::new(Explodes)).await?;
            Ok(json!({ "child_ok": result.success, "child_error": result.failure }))
        }
    }

    #[tokio::test]
    async fn run_completes_an_agent_and_records_its_trail() {
        let h = harness();
        let (owner, agent) = active_mission_with_agent(&h).await;

        let result = Arc::clone(&h.executor)
            .run(agent.id, Arc::new(Summarize), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);

        let stored = h
            .missions
            .store()
            .get_agent(agent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AgentStatus::Completed);
        assert!(stored.result.is_some());
        assert!(stored.memory.contains_key("summary"));

        let mission = h.missions.mission(agent.mission_id).await.unwrap().unwrap();
        assert!(mission.artifacts.contains_key("summary"));

        let records = h.budget.records(owner).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, Some(agent.id));

        let messages: Vec<String> = h
            .missions
            .mission_log(agent.mission_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.contains(&"agent started".to_string()));
        assert!(messages.contains(&"agent completed".to_string()));
    }

    #[tokio::test]
    async fn work_failure_is_an_unsuccessful_result_not_an_abort() {
        let h = harness();
        let (_owner, agent) = active_mission_with_agent(&h).await;

        let result = Arc::clone(&h.executor)
            .run(agent.id, Arc::new(Explodes), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.failure.as_deref().unwrap().contains("garbage"));

        let stored = h
            .missions
            .store()
            .get_agent(agent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);

        // The mission does not auto-transition on a failed agent.
        let mission = h.missions.mission(agent.mission_id).await.unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Active);
    }

    #[tokio::test]
    async fn over_budget_estimate_is_refused_before_any_spend() {
        let h = harness();
        let (owner, agent) = active_mission_with_agent(&h).await;
        h.budget
            .set_limit(UsageLimit::new(owner).per_task_usd(1.00))
            .await
            .unwrap();

        struct Expensive;

        #[async_trait]
        impl AgentWork for Expensive {
            fn cost_estimate(&self) -> CostEstimate {
                CostEstimate::usd(1.50)
            }

            async fn execute(&self, ctx: &AgentContext) -> anyhow::Result<Value> {
                ctx.charge("inference", 0, 1.50).await?;
                Ok(Value::Null)
            }
        }

        let err = Arc::clone(&h.executor)
            .run(agent.id, Arc::new(Expensive), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Budget(BudgetError::BudgetExceeded { .. })
        ));

        let stored = h
            .missions
            .store()
            .get_agent(agent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert!(stored
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("Budget exceeded"));

        // No partial spend for a refused run.
        let total: MicroUsd = h
            .budget
            .records(owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.cost_micros)
            .sum();
        assert_eq!(total, micro_usd(0.0));
    }

    #[tokio::test]
    async fn cancellation_fails_the_awaiting_agent() {
        let h = harness();
        let (_owner, agent) = active_mission_with_agent(&h).await;

        let cancel = CancellationToken::new();
        let run = tokio::spawn(
            Arc::clone(&h.executor).run(agent.id, Arc::new(Hangs), cancel.clone()),
        );
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, AgentError::Cancelled(_)));

        let stored = h
            .missions
            .store()
            .get_agent(agent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn child_failure_is_the_parents_call() {
        let h = harness();
        let (_owner, agent) = active_mission_with_agent(&h).await;

        let result = Arc::clone(&h.executor)
            .run(
                agent.id,
                Arc::new(DelegatesAndTolerates),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["child_ok"], json!(false));

        let agents = h.missions.agents(agent.mission_id).await.unwrap();
        assert_eq!(agents.len(), 2);
        let child = agents.iter().find(|a| a.id != agent.id).unwrap();
        assert_eq!(child.status, AgentStatus::Failed);
        assert_eq!(child.parent_agent_id, Some(agent.id));

        let mission = h.missions.mission(agent.mission_id).await.unwrap().unwrap();
        assert_eq!(mission.agent_count, 2);
        assert_eq!(mission.status, MissionStatus::Active);
    }

    struct Drained;

    #[async_trait]
    impl AgentWork for Drained {
        async fn execute(&self, _ctx: &AgentContext) -> anyhow::Result<Value> {
            Ok(json!("drained"))
        }
    }

    struct ConstResolver;

    impl WorkResolver for ConstResolver {
        fn resolve(&self, _agent: &Agent) -> Arc<dyn AgentWork> {
            Arc::new(Drained)
        }
    }

    #[tokio::test]
    async fn process_queue_drains_pending_agents_of_active_missions() {
        let h = harness();
        let owner = Uuid::new_v4();
        let active = h.missions.create_mission(owner, "digest").await.unwrap();
        h.missions.activate(active.id).await.unwrap();
        h.missions.spawn_agent(active.id, None, "one").await.unwrap();
        h.missions.spawn_agent(active.id, None, "two").await.unwrap();

        // Agents of a mission still in planning are left alone.
        let planning = h.missions.create_mission(owner, "later").await.unwrap();
        h.missions
            .spawn_agent(planning.id, None, "three")
            .await
            .unwrap();

        let action = ProcessQueueAction::new(Arc::clone(&h.executor), Arc::new(ConstResolver));
        let out = action.run(owner, &Value::Null).await.unwrap();
        assert_eq!(out, json!({ "completed": 2, "failed": 0, "skipped": 0 }));

        for agent in h.missions.agents(active.id).await.unwrap() {
            assert_eq!(agent.status, AgentStatus::Completed);
        }
        let waiting = &h.missions.agents(planning.id).await.unwrap()[0];
        assert_eq!(waiting.status, AgentStatus::Pending);

        // Retrying the drain finds nothing pending.
        let out = action.run(owner, &Value::Null).await.unwrap();
        assert_eq!(out, json!({ "completed": 0, "failed": 0, "skipped": 0 }));
    }

    #[tokio::test]
    async fn pause_and_resume_mirror_the_mission() {
        let h = harness();
        let (_owner, agent) = active_mission_with_agent(&h).await;
        let store = h.missions.store();
        store
            .transition_agent(agent.id, AgentStatus::Pending, AgentStatus::Active)
            .await
            .unwrap();

        let paused = h.executor.pause(agent.id).await.unwrap();
        assert_eq!(paused.status, AgentStatus::Paused);
        let resumed = h.executor.resume(agent.id).await.unwrap();
        assert_eq!(resumed.status, AgentStatus::Active);
    }
}
