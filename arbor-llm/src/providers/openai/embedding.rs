//! Embeddings over the OpenAI `/embeddings` endpoint

use super::client::OpenAIClient;
use super::types::{EmbeddingRequest, EmbeddingResponse};
use crate::providers::invalid_response;
use crate::EmbeddingProvider;
use arbor_core::{ArborResult, EmbeddingVector};
use async_trait::async_trait;

/// Upper bound on inputs per request accepted by the endpoint.
pub const MAX_INPUTS_PER_REQUEST: usize = 2048;

pub struct OpenAIEmbeddingProvider {
    client: OpenAIClient,
    model: String,
    dimensions: i32,
}

impl OpenAIEmbeddingProvider {
    pub fn new(client: OpenAIClient, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }

    /// text-embedding-3-small at 1536 dimensions.
    pub fn with_default_model(client: OpenAIClient) -> Self {
        Self::new(client, "text-embedding-3-small", 1536)
    }

    async fn embed_chunk(&self, chunk: &[&str]) -> ArborResult<Vec<EmbeddingVector>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: chunk,
            dimensions: Some(self.dimensions),
        };
        let response: EmbeddingResponse = self.client.request("embeddings", &body).await?;

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; chunk.len()];
        for item in response.data {
            match slots.get_mut(item.index) {
                Some(slot) => *slot = Some(item.embedding),
                None => {
                    return Err(invalid_response(
                        "openai",
                        format!("embedding index {} out of range", item.index),
                    ))
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.map(|values| EmbeddingVector::new(values, self.model.clone()))
                    .ok_or_else(|| invalid_response("openai", format!("missing embedding for input {}", i)))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> ArborResult<EmbeddingVector> {
        let mut vectors = self.embed_chunk(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| invalid_response("openai", "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> ArborResult<Vec<EmbeddingVector>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            out.extend(self.embed_chunk(chunk).await?);
        }
        tracing::debug!(inputs = texts.len(), model = %self.model, "embedded batch");
        Ok(out)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAIEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEmbeddingProvider")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
