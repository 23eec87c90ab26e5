//! Memory subsystem: confidence-weighted facts and contradiction detection.
//!
//! Facts are per-owner and confidence-scored; reading a fact bumps its access
//! counters (the basis for relevance/recency ranking), user confirmation
//! marks it verified, and a batch detection pass flags incompatible claims
//! without ever deleting data.

mod contradiction;
mod store;
mod types;

pub use contradiction::{authoritative, ClaimComparator, InferenceComparator};
pub use store::{FactStore, InMemoryFactStore};
pub use types::{Contradiction, MemoryError, MemoryFact};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actions::{Action, ActionError, DETECT_CONTRADICTIONS};

/// Memory store facade over a pluggable backend.
pub struct MemoryService {
    store: Arc<dyn FactStore>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }

    /// Insert a fact. Confidence is clamped to [0, 1]; the category must be
    /// non-empty.
    pub async fn remember(
        &self,
        owner: Uuid,
        category: &str,
        content: &str,
        source: &str,
        confidence: f64,
    ) -> Result<MemoryFact, MemoryError> {
        if category.trim().is_empty() {
            return Err(MemoryError::EmptyCategory);
        }
        let fact = MemoryFact::new(owner, category.trim(), content, source, confidence);
        self.store.insert_fact(fact.clone()).await?;
        debug!(fact = %fact.id, category = %fact.category, "fact remembered");
        Ok(fact)
    }

    /// Record a read: increments access_count and stamps last_accessed_at.
    pub async fn touch(&self, fact_id: Uuid) -> Result<MemoryFact, MemoryError> {
        self.store.touch_fact(fact_id).await
    }

    /// Mark a fact user-confirmed.
    pub async fn verify(&self, fact_id: Uuid) -> Result<MemoryFact, MemoryError> {
        self.store.verify_fact(fact_id).await
    }

    /// Corroboration hook: nudge confidence up or down, clamped to [0, 1].
    pub async fn reinforce(&self, fact_id: Uuid, delta: f64) -> Result<MemoryFact, MemoryError> {
        self.store.adjust_confidence(fact_id, delta).await
    }

    /// Delete a fact along with every contradiction touching it.
    pub async fn forget(&self, fact_id: Uuid) -> Result<bool, MemoryError> {
        self.store.delete_fact(fact_id).await
    }

    pub async fn facts(&self, owner: Uuid) -> Result<Vec<MemoryFact>, MemoryError> {
        self.store.facts_for_owner(owner).await
    }

    pub async fn contradictions(&self, owner: Uuid) -> Result<Vec<Contradiction>, MemoryError> {
        self.store.contradictions_for_owner(owner).await
    }

    /// Batch contradiction detection over an owner's facts.
    ///
    /// Each same-category pair is judged by the comparator; a pair already
    /// linked by an unresolved contradiction is skipped, so repeated passes
    /// over an unchanged fact set are idempotent. A comparator error leaves
    /// the pair unflagged for the next pass — detection never deletes data.
    pub async fn detect_contradictions(
        &self,
        owner: Uuid,
        comparator: &dyn ClaimComparator,
    ) -> Result<Vec<Contradiction>, MemoryError> {
        let mut facts = self.store.facts_for_owner(owner).await?;
        facts.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut found = Vec::new();
        for i in 0..facts.len() {
            for j in (i + 1)..facts.len() {
                let (a, b) = (&facts[i], &facts[j]);
                if a.category != b.category {
                    continue;
                }
                if self.store.has_unresolved_between(a.id, b.id).await? {
                    continue;
                }
                match comparator.contradicts(a, b).await {
                    Ok(true) => {
                        let contradiction = Contradiction::new(a.id, b.id);
                        self.store
                            .insert_contradiction(contradiction.clone())
                            .await?;
                        debug!(
                            a = %a.id, b = %b.id, category = %a.category,
                            "contradiction flagged"
                        );
                        found.push(contradiction);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        // Left unflagged for the next pass.
                        warn!(a = %a.id, b = %b.id, error = %e, "comparator failed");
                    }
                }
            }
        }
        Ok(found)
    }

    /// Mark a contradiction resolved with a rationale. Both facts persist.
    pub async fn resolve(
        &self,
        contradiction_id: Uuid,
        resolution: &str,
    ) -> Result<Contradiction, MemoryError> {
        self.store
            .resolve_contradiction(contradiction_id, resolution)
            .await
    }
}

/// `memories.detect_contradictions` as a dispatchable action, so detection
/// can run as a scheduled task. Re-running over an unchanged fact set flags
/// nothing new, which makes the action safe to retry.
pub struct DetectContradictionsAction {
    memory: Arc<MemoryService>,
    comparator: Arc<dyn ClaimComparator>,
}

impl DetectContradictionsAction {
    pub fn new(memory: Arc<MemoryService>, comparator: Arc<dyn ClaimComparator>) -> Self {
        Self { memory, comparator }
    }
}

#[async_trait]
impl Action for DetectContradictionsAction {
    fn name(&self) -> &str {
        DETECT_CONTRADICTIONS
    }

    async fn run(&self, owner: Uuid, _params: &Value) -> Result<Value, ActionError> {
        let found = self
            .memory
            .detect_contradictions(owner, self.comparator.as_ref())
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(json!({ "flagged": found.len() }))
    }
}
