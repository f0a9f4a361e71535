//! Background embedding refresh for nodes whose indexed text changed.

use arbor_core::{
    compute_content_hash, ArborResult, ContentHash, LlmError, NodeId, NodeView, TreeId,
};
use arbor_llm::EmbeddingProvider;
use arbor_storage::{DocumentStore, IndexScheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Result of one re-index attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexOutcome {
    Indexed,
    /// Text hash matched the last embedded version.
    Unchanged,
    /// The node no longer exists.
    Missing,
}

/// Text fed to the embedding model for one node.
pub fn indexed_text(node: &NodeView) -> String {
    let mut parts: Vec<&str> = vec![node.name()];
    parts.extend(node.node.description.as_deref());
    parts.extend(node.content.as_deref());
    for link in &node.links {
        parts.push(&link.name);
        parts.push(&link.url);
    }
    for attachment in &node.attachments {
        parts.push(&attachment.name);
        parts.extend(attachment.description.as_deref());
    }
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Re-embeds nodes on request, skipping text it has already embedded.
#[derive(Clone)]
pub struct EmbeddingIndexer {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn EmbeddingProvider>,
    hashes: Arc<Mutex<HashMap<NodeId, ContentHash>>>,
}

impl EmbeddingIndexer {
    pub fn new(store: Arc<dyn DocumentStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            hashes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cached(&self, node_id: NodeId) -> Option<ContentHash> {
        self.hashes.lock().ok()?.get(&node_id).copied()
    }

    fn remember(&self, node_id: NodeId, hash: Option<ContentHash>) {
        if let Ok(mut hashes) = self.hashes.lock() {
            match hash {
                Some(h) => hashes.insert(node_id, h),
                None => hashes.remove(&node_id),
            };
        }
    }

    /// Re-embed one node now.
    pub async fn reindex_now(&self, tree_id: TreeId, node_id: NodeId) -> ArborResult<ReindexOutcome> {
        let snapshot = self.store.load_snapshot(tree_id).await?;
        let Some(node) = snapshot.node(node_id) else {
            self.remember(node_id, None);
            return Ok(ReindexOutcome::Missing);
        };

        let text = indexed_text(node);
        let hash = compute_content_hash(text.as_bytes());
        if self.cached(node_id) == Some(hash) {
            debug!(%node_id, "Indexed text unchanged, skipping embedding");
            return Ok(ReindexOutcome::Unchanged);
        }

        let embedding = self.provider.embed(&text).await?;
        if !embedding.is_valid() {
            return Err(LlmError::EmbeddingFailed {
                reason: format!(
                    "provider {} returned an invalid vector",
                    self.provider.model_id()
                ),
            }
            .into());
        }
        self.store
            .embedding_upsert(tree_id, node_id, &embedding, hash)
            .await?;
        self.remember(node_id, Some(hash));
        debug!(%node_id, dimensions = embedding.dimensions, "Node re-indexed");
        Ok(ReindexOutcome::Indexed)
    }
}

impl IndexScheduler for EmbeddingIndexer {
    fn schedule(&self, tree_id: TreeId, node_id: NodeId) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(%tree_id, %node_id, "No async runtime, re-index dropped");
            return;
        };
        let indexer = self.clone();
        handle.spawn(async move {
            if let Err(e) = indexer.reindex_now(tree_id, node_id).await {
                warn!(%tree_id, %node_id, error = %e, "Background re-index failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{EntityIdType, NodeContent};
    use arbor_llm::MockEmbeddingProvider;
    use arbor_storage::InMemoryStore;
    use arbor_test_utils::{node_id, protocol_results_tree, TreeBuilder};
    use std::time::Duration;

    #[test]
    fn test_indexed_text_joins_fields() {
        let snapshot = TreeBuilder::new("t")
            .block("Protocol")
            .node_with_content("Lysis", "Add buffer.")
            .described("Break the cells")
            .link("Kit manual", "https://example.org/kit")
            .snapshot();
        let text = indexed_text(snapshot.nodes_in_order().next().unwrap());
        assert_eq!(
            text,
            "Lysis\nBreak the cells\nAdd buffer.\nKit manual\nhttps://example.org/kit"
        );
    }

    #[tokio::test]
    async fn test_unchanged_text_is_not_reembedded() {
        let store = Arc::new(InMemoryStore::new());
        let tree_id = protocol_results_tree().seed(&store);
        let snapshot = store.load_snapshot(tree_id).await.unwrap();
        let b = node_id(&snapshot, "Step B");
        let indexer = EmbeddingIndexer::new(store.clone(), Arc::new(MockEmbeddingProvider::new("mock", 8)));

        assert_eq!(indexer.reindex_now(tree_id, b).await.unwrap(), ReindexOutcome::Indexed);
        assert_eq!(indexer.reindex_now(tree_id, b).await.unwrap(), ReindexOutcome::Unchanged);

        store
            .content_upsert(&NodeContent::new(tree_id, b, "done, twice"))
            .await
            .unwrap();
        assert_eq!(indexer.reindex_now(tree_id, b).await.unwrap(), ReindexOutcome::Indexed);
        assert_eq!(store.embedding_count(), 1);
        assert_eq!(store.embedding(b).unwrap().dimensions, 8);
    }

    #[tokio::test]
    async fn test_missing_node_and_provider_failure() {
        let store = Arc::new(InMemoryStore::new());
        let tree_id = protocol_results_tree().seed(&store);
        let provider = Arc::new(MockEmbeddingProvider::new("mock", 4));
        let indexer = EmbeddingIndexer::new(store.clone(), provider.clone());

        let outcome = indexer.reindex_now(tree_id, NodeId::now_v7()).await.unwrap();
        assert_eq!(outcome, ReindexOutcome::Missing);

        provider.set_failing(true);
        let snapshot = store.load_snapshot(tree_id).await.unwrap();
        let a = node_id(&snapshot, "Step A");
        assert!(indexer.reindex_now(tree_id, a).await.is_err());
        assert_eq!(store.embedding_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_runs_in_background() {
        let store = Arc::new(InMemoryStore::new());
        let tree_id = protocol_results_tree().seed(&store);
        let snapshot = store.load_snapshot(tree_id).await.unwrap();
        let a = node_id(&snapshot, "Step A");
        let indexer = EmbeddingIndexer::new(store.clone(), Arc::new(MockEmbeddingProvider::new("mock", 4)));

        indexer.schedule(tree_id, a);
        for _ in 0..50 {
            if store.embedding_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.embedding_count(), 1);
    }

    #[test]
    fn test_schedule_without_runtime_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = EmbeddingIndexer::new(store.clone(), Arc::new(MockEmbeddingProvider::new("mock", 4)));
        indexer.schedule(TreeId::now_v7(), NodeId::now_v7());
        assert_eq!(store.embedding_count(), 0);
    }
}
