//! Shared application state and its wiring from configuration.

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use arbor_core::{ArborError, ArborResult, LlmError, PlannerConfig, TreeExport, TreeId};
use arbor_llm::{
    CompletionRequest, EmbeddingProvider, LanguageModel, ModelResponse, OpenAIClient,
    OpenAIEmbeddingProvider, OpenAILanguageModel,
};
use arbor_planner::{EmbeddingIndexer, ExecutionEngine, PlanGenerator, TreeEditService};
use arbor_storage::{
    Access, AclPermissions, IndexScheduler, InMemoryStore, NoopIndexScheduler, PermissionService,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Failure to load a tree export at startup.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read tree seed {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid tree export in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to import tree seed {}: {source}", .path.display())]
    Import { path: PathBuf, source: ArborError },
}

impl From<SeedError> for ApiError {
    fn from(err: SeedError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

/// Model used when no provider key is configured. Every call fails with
/// `ProviderNotConfigured`, which the planner folds into the plan narrative.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredModel;

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    async fn complete(&self, _request: &CompletionRequest) -> ArborResult<ModelResponse> {
        Err(LlmError::ProviderNotConfigured.into())
    }

    fn model_id(&self) -> &str {
        "unconfigured"
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TreeEditService>,
    pub model_configured: bool,
    pub start_time: Instant,
}

impl AppState {
    /// Wire a service over an already-populated store.
    pub fn assemble(
        store: Arc<InMemoryStore>,
        permissions: Arc<dyn PermissionService>,
        model: Arc<dyn LanguageModel>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        planner: PlannerConfig,
        model_configured: bool,
    ) -> Self {
        let indexer: Arc<dyn IndexScheduler> = match embedder {
            Some(provider) => Arc::new(EmbeddingIndexer::new(store.clone(), provider)),
            None => Arc::new(NoopIndexScheduler),
        };
        let engine = ExecutionEngine::new(store.clone(), permissions.clone(), indexer, &planner);
        let generator = PlanGenerator::new(model, planner);
        Self {
            service: Arc::new(TreeEditService::new(store, permissions, generator, engine)),
            model_configured,
            start_time: Instant::now(),
        }
    }

    /// Build the in-memory store, ACL and model providers from configuration.
    pub fn from_config(config: &ApiConfig, planner: PlannerConfig) -> ApiResult<Self> {
        planner
            .validate()
            .map_err(|e| ApiError::invalid_input(e.to_string()))?;

        let store = Arc::new(InMemoryStore::new());
        let acl = Arc::new(AclPermissions::new());
        for path in &config.tree_seed_paths {
            let tree_id = seed_tree(&store, path)?;
            for owner in &config.seed_owners {
                acl.grant(tree_id, *owner, Access::Write);
            }
        }
        if !config.tree_seed_paths.is_empty() && config.seed_owners.is_empty() {
            tracing::warn!("Trees seeded without owners; every request will be denied");
        }

        let (model, embedder): (Arc<dyn LanguageModel>, Option<Arc<dyn EmbeddingProvider>>) =
            match &config.openai_api_key {
                Some(key) => {
                    let mut client = OpenAIClient::new(key.clone(), config.requests_per_minute);
                    if let Some(base_url) = &config.openai_base_url {
                        client = client.with_base_url(base_url.clone());
                    }
                    let embedder: Arc<dyn EmbeddingProvider> =
                        Arc::new(OpenAIEmbeddingProvider::new(
                            client.clone(),
                            config.embedding_model.clone(),
                            config.embedding_dimensions,
                        ));
                    let model: Arc<dyn LanguageModel> =
                        Arc::new(OpenAILanguageModel::new(client, config.openai_model.clone()));
                    (model, Some(embedder))
                }
                None => {
                    tracing::warn!("No model provider key configured; plans will be empty");
                    (Arc::new(UnconfiguredModel), None)
                }
            };

        Ok(Self::assemble(
            store,
            acl,
            model,
            embedder,
            planner,
            config.model_configured(),
        ))
    }
}

/// Import one tree export file into the store.
pub fn seed_tree(store: &InMemoryStore, path: &Path) -> Result<TreeId, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let export: TreeExport = serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let nodes = export.nodes.len();
    let tree_id = store.import(export).map_err(|source| SeedError::Import {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(%tree_id, path = %path.display(), nodes, "Seeded tree");
    Ok(tree_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_test_utils::protocol_results_tree;

    #[tokio::test]
    async fn test_unconfigured_model_reports_missing_provider() {
        let request = CompletionRequest {
            messages: Vec::new(),
            functions: Vec::new(),
            tool_choice: arbor_llm::ToolChoice::Auto,
            temperature: 0.0,
            max_tokens: 10,
        };
        let err = UnconfiguredModel.complete(&request).await.unwrap_err();
        assert!(matches!(
            err,
            ArborError::Llm(LlmError::ProviderNotConfigured)
        ));
    }

    #[test]
    fn test_seed_tree_round_trips_an_export_file() {
        let export = protocol_results_tree().export();
        let path = std::env::temp_dir().join(format!("arbor-seed-{}.json", export.tree.id));
        std::fs::write(&path, serde_json::to_string(&export).unwrap()).unwrap();

        let store = InMemoryStore::new();
        let tree_id = seed_tree(&store, &path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(tree_id, export.tree.id);
        assert_eq!(store.tree_ids(), vec![tree_id]);
    }

    #[test]
    fn test_seed_errors_name_the_file() {
        let store = InMemoryStore::new();
        let missing = PathBuf::from("/nonexistent/arbor-tree.json");
        let err = seed_tree(&store, &missing).unwrap_err();
        assert!(matches!(err, SeedError::Read { .. }));
        assert!(err.to_string().contains("arbor-tree.json"));

        let bad = std::env::temp_dir().join(format!("arbor-bad-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&bad, "{not json").unwrap();
        let err = seed_tree(&store, &bad).unwrap_err();
        std::fs::remove_file(&bad).ok();
        assert!(matches!(err, SeedError::Parse { .. }));
    }
}
