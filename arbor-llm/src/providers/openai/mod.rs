//! OpenAI-compatible provider: chat completions with tools, and embeddings.

pub mod chat;
pub mod client;
pub mod embedding;
pub mod types;

pub use chat::OpenAILanguageModel;
pub use client::OpenAIClient;
pub use embedding::OpenAIEmbeddingProvider;
