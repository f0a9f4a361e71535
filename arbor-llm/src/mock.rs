//! In-process providers for tests

use crate::{CompletionRequest, EmbeddingProvider, LanguageModel, ModelResponse};
use arbor_core::{ArborError, ArborResult, EmbeddingVector, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn poisoned() -> ArborError {
    ArborError::Llm(LlmError::InvalidResponse {
        provider: "scripted".to_string(),
        reason: "script lock poisoned".to_string(),
    })
}

/// Language model that replays queued responses and records every request.
///
/// When the queue is exhausted it answers with empty prose.
#[derive(Debug, Default)]
pub struct ScriptedLanguageModel {
    responses: Mutex<VecDeque<ArborResult<ModelResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: ArborResult<ModelResponse>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Number of completions requested so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn complete(&self, request: &CompletionRequest) -> ArborResult<ModelResponse> {
        self.requests
            .lock()
            .map_err(|_| poisoned())?
            .push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().map_err(|_| poisoned())?.pop_front();
        next.unwrap_or_else(|| Ok(ModelResponse::text("")))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Mock embedding provider for testing.
/// Generates deterministic embeddings based on text content.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    model_id: String,
    dimensions: i32,
    failing: AtomicBool,
}

impl MockEmbeddingProvider {
    pub fn new(model_id: impl Into<String>, dimensions: i32) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions.max(1) as usize;
        let mut data = vec![0.0f32; dims];
        for (i, byte) in text.bytes().enumerate() {
            data[i % dims] += (byte as f32) / 255.0;
        }
        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }
        data
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> ArborResult<EmbeddingVector> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ArborError::Llm(LlmError::EmbeddingFailed {
                reason: "mock provider set to fail".to_string(),
            }));
        }
        Ok(EmbeddingVector::new(
            self.generate_embedding(text),
            self.model_id.clone(),
        ))
    }

    async fn embed_batch(&self, texts: &[&str]) -> ArborResult<Vec<EmbeddingVector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
