//! Generative model access and the reply assistant built on it.
//!
//! The classifier and the reply assistant only see the [`LanguageModel`] and
//! [`Embedder`] traits; [`GeminiClient`] implements both over REST.

pub mod gemini;
pub mod reply;
pub mod retrieval;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiClient;
pub use reply::{ReplyAssistant, ReplyError};
pub use retrieval::{cosine_similarity, RuleMatch, RuleStore};

/// Errors from a model call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The service refused the call because of rate or quota limits.
    #[error("Model call throttled: {message}")]
    Throttled {
        message: String,
        /// Server-suggested wait before retrying.
        retry_after: Option<Duration>,
    },

    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Model service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model returned no content")]
    EmptyResponse,

    #[error("Failed to decode model response: {0}")]
    Decode(String),

    #[error("Model API key unavailable: {0}")]
    MissingApiKey(String),
}

impl ModelError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, ModelError::Throttled { .. })
    }
}

/// Text generation: prompt in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Text embedding: text in, vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Escapes sequences that would let message text break out of its fence in
/// a prompt.
pub(crate) fn sanitize_for_prompt(text: &str) -> String {
    text.replace("\"\"\"", "\" \" \"")
}
