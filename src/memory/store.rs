//! Fact storage with pluggable backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{Contradiction, MemoryError, MemoryFact};

/// Fact store trait - implemented by all storage backends.
#[async_trait]
pub trait FactStore: Send + Sync {
    async fn insert_fact(&self, fact: MemoryFact) -> Result<(), MemoryError>;

    async fn get_fact(&self, id: Uuid) -> Result<Option<MemoryFact>, MemoryError>;

    /// All facts for an owner, unordered.
    async fn facts_for_owner(&self, owner: Uuid) -> Result<Vec<MemoryFact>, MemoryError>;

    /// Increment access_count and stamp last_accessed_at.
    async fn touch_fact(&self, id: Uuid) -> Result<MemoryFact, MemoryError>;

    /// Mark verified and stamp last_confirmed_by_user.
    async fn verify_fact(&self, id: Uuid) -> Result<MemoryFact, MemoryError>;

    /// Adjust confidence by delta, clamped to [0, 1].
    async fn adjust_confidence(&self, id: Uuid, delta: f64) -> Result<MemoryFact, MemoryError>;

    /// Delete a fact and every contradiction touching it.
    async fn delete_fact(&self, id: Uuid) -> Result<bool, MemoryError>;

    async fn insert_contradiction(&self, contradiction: Contradiction)
        -> Result<(), MemoryError>;

    /// Whether an unresolved contradiction already links the unordered pair.
    async fn has_unresolved_between(&self, a: Uuid, b: Uuid) -> Result<bool, MemoryError>;

    async fn get_contradiction(&self, id: Uuid) -> Result<Option<Contradiction>, MemoryError>;

    /// All contradictions touching any fact of the owner.
    async fn contradictions_for_owner(
        &self,
        owner: Uuid,
    ) -> Result<Vec<Contradiction>, MemoryError>;

    /// Mark resolved and store the rationale. Neither fact is deleted.
    async fn resolve_contradiction(
        &self,
        id: Uuid,
        resolution: &str,
    ) -> Result<Contradiction, MemoryError>;
}

#[derive(Default)]
struct FactState {
    facts: HashMap<Uuid, MemoryFact>,
    contradictions: Vec<Contradiction>,
}

/// In-memory fact store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryFactStore {
    state: Arc<RwLock<FactState>>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn insert_fact(&self, fact: MemoryFact) -> Result<(), MemoryError> {
        self.state.write().await.facts.insert(fact.id, fact);
        Ok(())
    }

    async fn get_fact(&self, id: Uuid) -> Result<Option<MemoryFact>, MemoryError> {
        Ok(self.state.read().await.facts.get(&id).cloned())
    }

    async fn facts_for_owner(&self, owner: Uuid) -> Result<Vec<MemoryFact>, MemoryError> {
        Ok(self
            .state
            .read()
            .await
            .facts
            .values()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect())
    }

    async fn touch_fact(&self, id: Uuid) -> Result<MemoryFact, MemoryError> {
        let mut state = self.state.write().await;
        let fact = state
            .facts
            .get_mut(&id)
            .ok_or(MemoryError::FactNotFound(id))?;
        fact.access_count += 1;
        fact.last_accessed_at = Utc::now();
        Ok(fact.clone())
    }

    async fn verify_fact(&self, id: Uuid) -> Result<MemoryFact, MemoryError> {
        let mut state = self.state.write().await;
        let fact = state
            .facts
            .get_mut(&id)
            .ok_or(MemoryError::FactNotFound(id))?;
        fact.verified = true;
        fact.last_confirmed_by_user = Some(Utc::now());
        Ok(fact.clone())
    }

    async fn adjust_confidence(&self, id: Uuid, delta: f64) -> Result<MemoryFact, MemoryError> {
        let mut state = self.state.write().await;
        let fact = state
            .facts
            .get_mut(&id)
            .ok_or(MemoryError::FactNotFound(id))?;
        fact.confidence = (fact.confidence + delta).clamp(0.0, 1.0);
        Ok(fact.clone())
    }

    async fn delete_fact(&self, id: Uuid) -> Result<bool, MemoryError> {
        let mut state = self.state.write().await;
        let removed = state.facts.remove(&id).is_some();
        if removed {
            state.contradictions.retain(|c| !c.touches(id));
        }
        Ok(removed)
    }

    async fn insert_contradiction(
        &self,
        contradiction: Contradiction,
    ) -> Result<(), MemoryError> {
        self.state.write().await.contradictions.push(contradiction);
        Ok(())
    }

    async fn has_unresolved_between(&self, a: Uuid, b: Uuid) -> Result<bool, MemoryError> {
        Ok(self
            .state
            .read()
            .await
            .contradictions
            .iter()
            .any(|c| !c.resolved && c.links(a, b)))
    }

    async fn get_contradiction(&self, id: Uuid) -> Result<Option<Contradiction>, MemoryError> {
        Ok(self
            .state
            .read()
            .await
            .contradictions
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn contradictions_for_owner(
        &self,
        owner: Uuid,
    ) -> Result<Vec<Contradiction>, MemoryError> {
        let state = self.state.read().await;
        let owned: Vec<Uuid> = state
            .facts
            .values()
            .filter(|f| f.owner == owner)
            .map(|f| f.id)
            .collect();
        Ok(state
            .contradictions
            .iter()
            .filter(|c| owned.contains(&c.memory_id) || owned.contains(&c.contradicts_memory_id))
            .cloned()
            .collect())
    }

    async fn resolve_contradiction(
        &self,
        id: Uuid,
        resolution: &str,
    ) -> Result<Contradiction, MemoryError> {
        let mut state = self.state.write().await;
        let contradiction = state
            .contradictions
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(MemoryError::ContradictionNotFound(id))?;
        contradiction.resolved = true;
        contradiction.resolution = Some(resolution.to_string());
        Ok(contradiction.clone())
    }
}
