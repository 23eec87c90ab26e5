//! # Gitu Core
//!
//! Autonomous agent orchestration core: missions decomposed into agent
//! trees, a scheduler with retry semantics, per-user budget enforcement, and
//! a confidence-weighted memory store with contradiction detection.
//!
//! ## Architecture
//!
//! ```text
//!   Scheduler ──creates/activates──▶ MissionManager
//!                                        │ spawns
//!                                        ▼
//!                                  AgentExecutor ──runs──▶ SandboxRunner
//!                                   │        │
//!                            consults        consults
//!                                   ▼        ▼
//!                          MemoryService   BudgetLedger
//! ```
//!
//! Every component writes append-only audit records through its store:
//! mission log entries, task and rule executions, plugin executions, and
//! usage records.
//!
//! ## Boundaries
//!
//! The UI, channel adapters, and LLM provider clients live outside this
//! crate. Channel adapters inject events via [`scheduler::Scheduler::evaluate`];
//! model access goes through the opaque [`infer::Inference`] trait; each
//! subsystem persists behind a store trait with a bundled in-memory backend.
//!
//! ## Modules
//! - `mission`: missions, agent trees, and the mission audit log
//! - `agents`: the agent executor and its work/context contracts
//! - `scheduler`: scheduled tasks, automation rules, retry/backoff
//! - `memory`: confidence-weighted facts and contradiction detection
//! - `budget`: usage records, limits, and cap enforcement
//! - `sandbox`: plugin execution under timeout and panic containment
//! - `actions`: the named-action registry shared by tasks and rules
//! - `infer`: the opaque inference boundary
//! - `config`: environment-driven configuration

pub mod actions;
pub mod agents;
pub mod budget;
pub mod config;
pub mod infer;
pub mod memory;
pub mod mission;
pub mod sandbox;
pub mod scheduler;

pub use actions::{Action, ActionCall, ActionError, ActionRegistry};
pub use agents::{AgentContext, AgentExecutor, AgentResult, AgentWork};
pub use budget::{BudgetLedger, UsageLimit};
pub use config::{ConfigError, CoreConfig};
pub use infer::Inference;
pub use memory::MemoryService;
pub use mission::MissionManager;
pub use sandbox::SandboxRunner;
pub use scheduler::{Scheduler, Trigger};
