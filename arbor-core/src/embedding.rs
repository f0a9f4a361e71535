//! Embedding vectors produced for node text

use serde::{Deserialize, Serialize};

/// Embedding vector with dynamic dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub data: Vec<f32>,
    /// Identifier of the model that produced this embedding.
    pub model_id: String,
    /// Number of dimensions (must match data.len()).
    pub dimensions: i32,
}

impl EmbeddingVector {
    pub fn new(data: Vec<f32>, model_id: impl Into<String>) -> Self {
        let dimensions = data.len() as i32;
        Self {
            data,
            model_id: model_id.into(),
            dimensions,
        }
    }

    /// Check if this vector has valid dimensions and finite components.
    pub fn is_valid(&self) -> bool {
        self.dimensions > 0
            && self.data.len() == self.dimensions as usize
            && self.data.iter().all(|v| v.is_finite())
    }
}
