//! Opaque inference boundary.
//!
//! The core never talks to an LLM vendor directly. Anything that needs a
//! model-backed judgment (agent work, the contradiction comparator) goes
//! through this trait; any provider adapter satisfying the signature is
//! acceptable.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InferError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),
}

/// An opaque inference capability: prompt in, text out.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(&self, prompt: &str, model_id: &str) -> Result<String, InferError>;
}
