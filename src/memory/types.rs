//! Types for the memory subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A confidence-scored fact in a user's long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: Uuid,
    pub owner: Uuid,
    /// Free-form grouping, e.g. "preference", "location", "project"
    pub category: String,
    pub content: String,
    /// Provenance: which conversation or agent produced this fact
    pub source: String,
    /// Confidence in [0, 1], clamped on write
    pub confidence: f64,
    pub verified: bool,
    pub last_confirmed_by_user: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl MemoryFact {
    pub fn new(
        owner: Uuid,
        category: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            category: category.into(),
            content: content.into(),
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
            verified: false,
            last_confirmed_by_user: None,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
        }
    }
}

/// A flagged incompatibility between two facts.
///
/// Stored directionally but undirected in meaning: at most one unresolved
/// contradiction may exist per unordered fact pair. Destroyed when either
/// fact is destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: Uuid,
    pub memory_id: Uuid,
    pub contradicts_memory_id: Uuid,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contradiction {
    pub fn new(memory_id: Uuid, contradicts_memory_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            memory_id,
            contradicts_memory_id,
            resolved: false,
            resolution: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this contradiction links the given unordered fact pair.
    pub fn links(&self, a: Uuid, b: Uuid) -> bool {
        (self.memory_id == a && self.contradicts_memory_id == b)
            || (self.memory_id == b && self.contradicts_memory_id == a)
    }

    /// Whether this contradiction touches the given fact.
    pub fn touches(&self, fact_id: Uuid) -> bool {
        self.memory_id == fact_id || self.contradicts_memory_id == fact_id
    }
}

/// Errors in memory operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    #[error("Fact not found: {0}")]
    FactNotFound(Uuid),

    #[error("Contradiction not found: {0}")]
    ContradictionNotFound(Uuid),

    #[error("Category must not be empty")]
    EmptyCategory,

    #[error("Comparator error: {0}")]
    Comparator(String),
}
