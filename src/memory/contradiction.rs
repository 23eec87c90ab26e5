//! Semantic comparison of fact pairs.
//!
//! The judgment of whether two facts assert incompatible claims is a
//! pluggable capability with the same shape as the inference boundary. The
//! bundled [`InferenceComparator`] delegates to an LLM; tests and rule-based
//! deployments can supply their own implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::infer::Inference;

use super::types::{MemoryError, MemoryFact};

/// Decides whether two same-category facts contradict each other.
#[async_trait]
pub trait ClaimComparator: Send + Sync {
    async fn contradicts(&self, a: &MemoryFact, b: &MemoryFact) -> Result<bool, MemoryError>;
}

/// Comparator that asks a model whether two claims are incompatible.
pub struct InferenceComparator {
    inference: Arc<dyn Inference>,
    model_id: String,
}

impl InferenceComparator {
    pub fn new(inference: Arc<dyn Inference>, model_id: impl Into<String>) -> Self {
        Self {
            inference,
            model_id: model_id.into(),
        }
    }

    fn prompt(a: &MemoryFact, b: &MemoryFact) -> String {
        format!(
            "Two stored facts share the category \"{}\".\n\
             Fact A: {}\n\
             Fact B: {}\n\
             Do they assert incompatible claims about the same subject? \
             Answer with exactly YES or NO.",
            a.category, a.content, b.content
        )
    }
}

#[async_trait]
impl ClaimComparator for InferenceComparator {
    async fn contradicts(&self, a: &MemoryFact, b: &MemoryFact) -> Result<bool, MemoryError> {
        let answer = self
            .inference
            .infer(&Self::prompt(a, b), &self.model_id)
            .await
            .map_err(|e| MemoryError::Comparator(e.to_string()))?;
        Ok(answer.trim().to_uppercase().starts_with("YES"))
    }
}

/// Pick the fact treated as authoritative for presentation purposes.
///
/// Higher confidence wins; on a tie the verified fact wins, then the one most
/// recently confirmed by the user. Neither fact is ever deleted.
pub fn authoritative<'a>(a: &'a MemoryFact, b: &'a MemoryFact) -> &'a MemoryFact {
    if a.confidence != b.confidence {
        return if a.confidence > b.confidence { a } else { b };
    }
    match (a.verified, b.verified) {
        (true, false) => return a,
        (false, true) => return b,
        _ => {}
    }
    if a.last_confirmed_by_user >= b.last_confirmed_by_user {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fact(confidence: f64, verified: bool) -> MemoryFact {
        let mut f = MemoryFact::new(Uuid::new_v4(), "location", "x", "test", confidence);
        f.verified = verified;
        if verified {
            f.last_confirmed_by_user = Some(chrono::Utc::now());
        }
        f
    }

    #[test]
    fn higher_confidence_wins() {
        let a = fact(0.9, true);
        let b = fact(0.4, false);
        assert_eq!(authoritative(&a, &b).id, a.id);
        assert_eq!(authoritative(&b, &a).id, a.id);
    }

    #[test]
    fn verified_breaks_confidence_tie() {
        let a = fact(0.5, false);
        let b = fact(0.5, true);
        assert_eq!(authoritative(&a, &b).id, b.id);
    }
}
