//! ARBOR Test Utilities
//!
//! Shared test infrastructure for the Arbor workspace:
//! - `TreeBuilder` for assembling small trees by name
//! - Proptest generators for random tree shapes
//! - Fixtures for the scenarios most tests start from
//! - Fakes for the store, permission and index-scheduling boundaries
//! - Assertions on Arbor error variants

use arbor_core::{
    ArborResult, AttachmentId, Block, BlockId, ContentHash, DependencyId, DependencyType,
    EmbeddingVector, EntityIdType, LinkId, Node, NodeAttachment, NodeContent, NodeDependency,
    NodeId, NodeLink, PermissionError, StorageError, Tree, TreeExport, TreeId, TreeSnapshot,
    UserId,
};
use arbor_storage::{
    Access, BlockUpdate, DocumentStore, IndexScheduler, InMemoryStore, NodeUpdate,
    PermissionScope, PermissionService,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub use fixtures::{model_with_calls, named_node_list, protocol_results_tree};
pub use generators::{arb_tree_spec, BlockSpec, NodeSpec, TreeSpec};

// ============================================================================
// TREE BUILDER
// ============================================================================

/// Builds a tree block by block, node by node.
///
/// `described`, `link`, `attachment` and `depends_on` apply to the most
/// recently added node. Dependencies are resolved by name when the tree is
/// materialised, so they may point at nodes added later.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    tree: Tree,
    blocks: Vec<Block>,
    nodes: Vec<Node>,
    contents: Vec<NodeContent>,
    links: Vec<NodeLink>,
    attachments: Vec<NodeAttachment>,
    dependencies: Vec<(NodeId, String)>,
}

impl TreeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tree: Tree::new(name),
            blocks: Vec::new(),
            nodes: Vec::new(),
            contents: Vec::new(),
            links: Vec::new(),
            attachments: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree.tree_id
    }

    pub fn block(mut self, name: impl Into<String>) -> Self {
        let position = self.blocks.len() as i32;
        self.blocks.push(Block::new(self.tree.tree_id, name, position));
        self
    }

    /// Add a node to the current block, opening a "Main" block if none exists.
    pub fn node(mut self, name: impl Into<String>) -> Self {
        if self.blocks.is_empty() {
            self = self.block("Main");
        }
        let block_id = self.current_block();
        let position = self.nodes.iter().filter(|n| n.block_id == block_id).count() as i32;
        self.nodes
            .push(Node::new(self.tree.tree_id, block_id, name, position));
        self
    }

    pub fn node_with_content(self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.node(name).content(content)
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        let node_id = self.current_node();
        self.contents.retain(|c| c.node_id != node_id);
        self.contents
            .push(NodeContent::new(self.tree.tree_id, node_id, content));
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.description = Some(description.into());
        }
        self
    }

    pub fn link(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        let node_id = self.current_node();
        self.links.push(NodeLink {
            link_id: LinkId::now_v7(),
            node_id,
            tree_id: self.tree.tree_id,
            name: name.into(),
            url: url.into(),
            description: None,
            link_type: None,
        });
        self
    }

    pub fn attachment(mut self, name: impl Into<String>, file_url: impl Into<String>) -> Self {
        let node_id = self.current_node();
        self.attachments.push(NodeAttachment {
            attachment_id: AttachmentId::now_v7(),
            node_id,
            tree_id: self.tree.tree_id,
            name: name.into(),
            file_url: file_url.into(),
            file_type: None,
            description: None,
        });
        self
    }

    pub fn depends_on(mut self, other: impl Into<String>) -> Self {
        let node_id = self.current_node();
        self.dependencies.push((node_id, other.into()));
        self
    }

    fn current_block(&self) -> BlockId {
        self.blocks
            .last()
            .map(|b| b.block_id)
            .expect("TreeBuilder: add a block first")
    }

    fn current_node(&self) -> NodeId {
        self.nodes
            .last()
            .map(|n| n.node_id)
            .expect("TreeBuilder: add a node first")
    }

    fn resolved_dependencies(&self) -> Vec<NodeDependency> {
        self.dependencies
            .iter()
            .map(|(from, name)| {
                let to = self
                    .nodes
                    .iter()
                    .find(|n| n.name == *name)
                    .unwrap_or_else(|| panic!("TreeBuilder: no node named '{}'", name));
                NodeDependency {
                    dependency_id: DependencyId::now_v7(),
                    tree_id: self.tree.tree_id,
                    from_node_id: *from,
                    to_node_id: to.node_id,
                    dependency_type: DependencyType::Requires,
                    evidence_text: None,
                    confidence: None,
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::assemble(
            self.tree.clone(),
            self.blocks.clone(),
            self.nodes.clone(),
            self.contents.clone(),
            self.links.clone(),
            self.attachments.clone(),
            self.resolved_dependencies(),
        )
    }

    pub fn export(&self) -> TreeExport {
        TreeExport::from_snapshot(&self.snapshot())
    }

    /// Import the tree into `store` and return its id.
    pub fn seed(&self, store: &InMemoryStore) -> TreeId {
        store
            .import(self.export())
            .expect("TreeBuilder: seeding the store failed")
    }
}

/// Id of the node called `name`. Panics when there is none.
#[track_caller]
pub fn node_id(snapshot: &TreeSnapshot, name: &str) -> NodeId {
    snapshot
        .nodes_in_order()
        .find(|n| n.name() == name)
        .map(|n| n.id())
        .unwrap_or_else(|| panic!("no node named '{}'", name))
}

/// Id of the block called `name`. Panics when there is none.
#[track_caller]
pub fn block_id(snapshot: &TreeSnapshot, name: &str) -> BlockId {
    snapshot
        .blocks()
        .iter()
        .find(|b| b.name() == name)
        .map(|b| b.id())
        .unwrap_or_else(|| panic!("no block named '{}'", name))
}

// ============================================================================
// FAKES
// ============================================================================

/// Permission service whose backend never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachablePermissions;

#[async_trait]
impl PermissionService for UnreachablePermissions {
    async fn check(
        &self,
        _user: UserId,
        _scope: PermissionScope,
        _access: Access,
    ) -> ArborResult<bool> {
        Err(PermissionError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into())
    }
}

/// Index scheduler that records every request instead of acting on it.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(TreeId, NodeId)>>,
}

impl RecordingScheduler {
    pub fn scheduled(&self) -> Vec<(TreeId, NodeId)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl IndexScheduler for RecordingScheduler {
    fn schedule(&self, tree_id: TreeId, node_id: NodeId) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((tree_id, node_id));
        }
    }
}

/// Store that fails one named write, once, after letting `skip` calls of
/// it through. Everything else is delegated to an [`InMemoryStore`].
#[derive(Debug)]
pub struct FailingStore {
    inner: Arc<InMemoryStore>,
    method: &'static str,
    /// Calls still allowed through; `None` once the failure has fired.
    remaining: Mutex<Option<usize>>,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryStore>, method: &'static str, skip: usize) -> Self {
        Self {
            inner,
            method,
            remaining: Mutex::new(Some(skip)),
        }
    }

    /// Whether the injected failure has happened.
    pub fn tripped(&self) -> bool {
        self.remaining.lock().map(|r| r.is_none()).unwrap_or(true)
    }

    fn gate(&self, method: &str) -> ArborResult<()> {
        if method != self.method {
            return Ok(());
        }
        let mut remaining = self
            .remaining
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        match *remaining {
            Some(0) => {
                *remaining = None;
                Err(StorageError::ConstraintViolation {
                    constraint: method.to_string(),
                    reason: "injected failure".to_string(),
                }
                .into())
            }
            Some(n) => {
                *remaining = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn tree_get(&self, tree_id: TreeId) -> ArborResult<Option<Tree>> {
        self.inner.tree_get(tree_id).await
    }

    async fn tree_insert(&self, tree: &Tree) -> ArborResult<()> {
        self.gate("tree_insert")?;
        self.inner.tree_insert(tree).await
    }

    async fn block_list(&self, tree_id: TreeId) -> ArborResult<Vec<Block>> {
        self.inner.block_list(tree_id).await
    }

    async fn block_insert(&self, block: &Block) -> ArborResult<()> {
        self.gate("block_insert")?;
        self.inner.block_insert(block).await
    }

    async fn block_update(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        update: BlockUpdate,
    ) -> ArborResult<Block> {
        self.gate("block_update")?;
        self.inner.block_update(tree_id, block_id, update).await
    }

    async fn block_delete(&self, tree_id: TreeId, block_id: BlockId) -> ArborResult<()> {
        self.gate("block_delete")?;
        self.inner.block_delete(tree_id, block_id).await
    }

    async fn block_shift_positions(
        &self,
        tree_id: TreeId,
        from: i32,
        delta: i32,
    ) -> ArborResult<()> {
        self.gate("block_shift_positions")?;
        self.inner.block_shift_positions(tree_id, from, delta).await
    }

    async fn node_list(&self, tree_id: TreeId) -> ArborResult<Vec<Node>> {
        self.inner.node_list(tree_id).await
    }

    async fn node_insert(&self, node: &Node) -> ArborResult<()> {
        self.gate("node_insert")?;
        self.inner.node_insert(node).await
    }

    async fn node_update(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> ArborResult<Node> {
        self.gate("node_update")?;
        self.inner.node_update(tree_id, node_id, update).await
    }

    async fn node_restore(&self, node: &Node) -> ArborResult<()> {
        self.gate("node_restore")?;
        self.inner.node_restore(node).await
    }

    async fn node_delete(&self, tree_id: TreeId, node_id: NodeId) -> ArborResult<()> {
        self.gate("node_delete")?;
        self.inner.node_delete(tree_id, node_id).await
    }

    async fn node_shift_positions(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        from: i32,
        delta: i32,
    ) -> ArborResult<()> {
        self.gate("node_shift_positions")?;
        self.inner
            .node_shift_positions(tree_id, block_id, from, delta)
            .await
    }

    async fn content_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeContent>> {
        self.inner.content_list(tree_id).await
    }

    async fn content_upsert(&self, content: &NodeContent) -> ArborResult<()> {
        self.gate("content_upsert")?;
        self.inner.content_upsert(content).await
    }

    async fn link_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeLink>> {
        self.inner.link_list(tree_id).await
    }

    async fn link_insert(&self, link: &NodeLink) -> ArborResult<()> {
        self.gate("link_insert")?;
        self.inner.link_insert(link).await
    }

    async fn link_delete(&self, tree_id: TreeId, link_id: LinkId) -> ArborResult<()> {
        self.gate("link_delete")?;
        self.inner.link_delete(tree_id, link_id).await
    }

    async fn attachment_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeAttachment>> {
        self.inner.attachment_list(tree_id).await
    }

    async fn attachment_insert(&self, attachment: &NodeAttachment) -> ArborResult<()> {
        self.gate("attachment_insert")?;
        self.inner.attachment_insert(attachment).await
    }

    async fn attachment_delete(
        &self,
        tree_id: TreeId,
        attachment_id: AttachmentId,
    ) -> ArborResult<()> {
        self.gate("attachment_delete")?;
        self.inner.attachment_delete(tree_id, attachment_id).await
    }

    async fn dependency_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeDependency>> {
        self.inner.dependency_list(tree_id).await
    }

    async fn dependency_insert(&self, dependency: &NodeDependency) -> ArborResult<()> {
        self.gate("dependency_insert")?;
        self.inner.dependency_insert(dependency).await
    }

    async fn dependency_delete(
        &self,
        tree_id: TreeId,
        dependency_id: DependencyId,
    ) -> ArborResult<()> {
        self.gate("dependency_delete")?;
        self.inner.dependency_delete(tree_id, dependency_id).await
    }

    async fn embedding_upsert(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        embedding: &EmbeddingVector,
        content_hash: ContentHash,
    ) -> ArborResult<()> {
        self.gate("embedding_upsert")?;
        self.inner
            .embedding_upsert(tree_id, node_id, embedding, content_hash)
            .await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for random tree shapes.

    use super::TreeBuilder;
    use proptest::prelude::*;

    const WORDS: &[&str] = &[
        "Lysis", "Spin", "Wash", "Elute", "Measure", "Mix", "Incubate", "Plate", "Count", "Stain",
    ];

    #[derive(Debug, Clone)]
    pub struct NodeSpec {
        pub name: String,
        pub description: Option<String>,
        /// `Some` with blank text is stored but counts as empty.
        pub content: Option<String>,
    }

    #[derive(Debug, Clone)]
    pub struct BlockSpec {
        pub name: String,
        pub nodes: Vec<NodeSpec>,
    }

    #[derive(Debug, Clone)]
    pub struct TreeSpec {
        pub blocks: Vec<BlockSpec>,
    }

    impl TreeSpec {
        pub fn builder(&self) -> TreeBuilder {
            let mut builder = TreeBuilder::new("generated");
            for block in &self.blocks {
                builder = builder.block(block.name.clone());
                for node in &block.nodes {
                    builder = builder.node(node.name.clone());
                    if let Some(description) = &node.description {
                        builder = builder.described(description.clone());
                    }
                    if let Some(content) = &node.content {
                        builder = builder.content(content.clone());
                    }
                }
            }
            builder
        }

        pub fn node_count(&self) -> usize {
            self.blocks.iter().map(|b| b.nodes.len()).sum()
        }
    }

    fn arb_content() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            2 => Just(None),
            1 => Just(Some("  ".to_string())),
            3 => "[a-z]{3,10}( [a-z]{3,10}){0,3}\\.".prop_map(Some),
        ]
    }

    fn arb_description() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[A-Z][a-z]{2,8}( [a-z]{2,8}){0,4}\\.")
    }

    /// Between one and three blocks of up to five nodes each. Node names are
    /// unique across the tree.
    pub fn arb_tree_spec() -> impl Strategy<Value = TreeSpec> {
        let node = (
            proptest::sample::select(WORDS),
            arb_description(),
            arb_content(),
        );
        proptest::collection::vec(proptest::collection::vec(node, 0..5), 1..4).prop_map(
            |blocks| {
                let mut counter = 0usize;
                let blocks = blocks
                    .into_iter()
                    .enumerate()
                    .map(|(b, nodes)| BlockSpec {
                        name: format!("Section {}", b + 1),
                        nodes: nodes
                            .into_iter()
                            .map(|(word, description, content)| {
                                counter += 1;
                                NodeSpec {
                                    name: format!("{} {}", word, counter),
                                    description,
                                    content,
                                }
                            })
                            .collect(),
                    })
                    .collect();
                TreeSpec { blocks }
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built scenarios.

    use super::TreeBuilder;
    use arbor_llm::{FunctionCall, ModelResponse, ScriptedLanguageModel};
    use serde_json::Value;

    /// Two blocks, three nodes:
    ///
    /// - Protocol: "Step A" (empty), "Step B" (content "done")
    /// - Results: "Step C" (empty)
    pub fn protocol_results_tree() -> TreeBuilder {
        TreeBuilder::new("Assay")
            .block("Protocol")
            .node("Step A")
            .node_with_content("Step B", "done")
            .block("Results")
            .node("Step C")
    }

    /// A model that answers its first call with the given function calls.
    pub fn model_with_calls(
        calls: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> ScriptedLanguageModel {
        ScriptedLanguageModel::with_responses([ModelResponse::calls(
            calls
                .into_iter()
                .map(|(name, args)| FunctionCall::new(name, args))
                .collect(),
        )])
    }

    /// "node: A / node: B / ..." list, the way users paste names.
    pub fn named_node_list(names: &[&str]) -> String {
        names
            .iter()
            .map(|n| format!("node: {}", n))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Arbor error variants.

    use arbor_core::{ArborError, ArborResult, EntityType, PermissionError, StorageError};

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ArborResult<T>, entity_type: EntityType) {
        match result {
            Err(ArborError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    #[track_caller]
    pub fn assert_permission_denied<T: std::fmt::Debug>(result: &ArborResult<T>) {
        match result {
            Err(ArborError::Permission(PermissionError::Denied { .. })) => {}
            other => panic!("Expected permission denial, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ArborResult<T>) {
        match result {
            Err(ArborError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
