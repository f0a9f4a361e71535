//! ARBOR LLM - Model Provider Layer
//!
//! Provider-agnostic traits for function-calling completion and embeddings,
//! the operation function catalog, and concrete providers.

pub mod catalog;
pub mod mock;
pub mod providers;
pub mod types;

pub use catalog::{catalog, SearchFunction, CATALOG_VERSION, FIND_BLOCK, FIND_NODE};
pub use mock::{MockEmbeddingProvider, ScriptedLanguageModel};
pub use providers::{OpenAIClient, OpenAIEmbeddingProvider, OpenAILanguageModel};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, FunctionCall, FunctionSpec, ModelResponse,
    TokenUsage, ToolChoice,
};

use arbor_core::{ArborResult, EmbeddingVector};
use async_trait::async_trait;

// ============================================================================
// LANGUAGE MODEL TRAIT
// ============================================================================

/// A function-calling language model.
///
/// Treated as a fallible oracle: responses may omit, duplicate or mis-target
/// calls, and callers bound every call with their own timeout.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion with the offered functions.
    async fn complete(&self, request: &CompletionRequest) -> ArborResult<ModelResponse>;

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;
}

// ============================================================================
// EMBEDDING PROVIDER TRAIT
// ============================================================================

/// Trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> ArborResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> ArborResult<Vec<EmbeddingVector>>;

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> i32;

    fn model_id(&self) -> &str;
}
