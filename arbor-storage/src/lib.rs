//! ARBOR Storage - Document Store and Permission Boundaries
//!
//! The engine only performs tree-scoped CRUD against seven collections
//! (trees, blocks, nodes, node content, links, attachments, dependencies)
//! and asks a permission service whether a user may read or write a scope.
//! Both boundaries are async traits so the engine can be driven by the
//! in-memory implementations here or by a real backend.

mod memory;
mod permission;

pub use memory::InMemoryStore;
pub use permission::{Access, AclPermissions, PermissionScope, PermissionService};

use arbor_core::{
    ArborError, ArborResult, AttachmentId, Block, BlockId, ContentHash, DependencyId,
    EmbeddingVector, EntityIdType, EntityType, LinkId, Node, NodeAttachment, NodeContent,
    NodeDependency, NodeId, NodeLink, NodeStatus, StorageError, Tree, TreeId, TreeSnapshot,
};
use async_trait::async_trait;

// ============================================================================
// UPDATE PAYLOADS
// ============================================================================

/// Update payload for blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub block_type: Option<String>,
    pub position: Option<i32>,
}

/// Update payload for nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub node_type: Option<String>,
    pub status: Option<NodeStatus>,
    pub confidence: Option<f32>,
    /// Moves the node to another block.
    pub block_id: Option<BlockId>,
    pub position: Option<i32>,
}

impl BlockUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// DOCUMENT STORE TRAIT
// ============================================================================

/// Tree-scoped CRUD over the document collections.
///
/// Every call carries the owning tree's id; rows belonging to another tree
/// are reported as not found.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // === Trees ===

    async fn tree_get(&self, tree_id: TreeId) -> ArborResult<Option<Tree>>;

    async fn tree_insert(&self, tree: &Tree) -> ArborResult<()>;

    // === Blocks ===

    async fn block_list(&self, tree_id: TreeId) -> ArborResult<Vec<Block>>;

    async fn block_insert(&self, block: &Block) -> ArborResult<()>;

    async fn block_update(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        update: BlockUpdate,
    ) -> ArborResult<Block>;

    /// Delete a block together with its nodes and their child rows.
    async fn block_delete(&self, tree_id: TreeId, block_id: BlockId) -> ArborResult<()>;

    /// Add `delta` to the position of every block at or after `from`.
    async fn block_shift_positions(&self, tree_id: TreeId, from: i32, delta: i32)
        -> ArborResult<()>;

    // === Nodes ===

    async fn node_list(&self, tree_id: TreeId) -> ArborResult<Vec<Node>>;

    async fn node_insert(&self, node: &Node) -> ArborResult<()>;

    async fn node_update(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> ArborResult<Node>;

    /// Overwrite a node row with an earlier copy of itself.
    async fn node_restore(&self, node: &Node) -> ArborResult<()>;

    /// Delete a node with its content, links, attachments, and every
    /// dependency pointing from or to it.
    async fn node_delete(&self, tree_id: TreeId, node_id: NodeId) -> ArborResult<()>;

    /// Add `delta` to the position of every node of `block_id` at or after `from`.
    async fn node_shift_positions(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        from: i32,
        delta: i32,
    ) -> ArborResult<()>;

    // === Node content ===

    async fn content_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeContent>>;

    async fn content_upsert(&self, content: &NodeContent) -> ArborResult<()>;

    // === Links ===

    async fn link_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeLink>>;

    async fn link_insert(&self, link: &NodeLink) -> ArborResult<()>;

    async fn link_delete(&self, tree_id: TreeId, link_id: LinkId) -> ArborResult<()>;

    // === Attachments ===

    async fn attachment_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeAttachment>>;

    async fn attachment_insert(&self, attachment: &NodeAttachment) -> ArborResult<()>;

    async fn attachment_delete(
        &self,
        tree_id: TreeId,
        attachment_id: AttachmentId,
    ) -> ArborResult<()>;

    // === Dependencies ===

    async fn dependency_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeDependency>>;

    async fn dependency_insert(&self, dependency: &NodeDependency) -> ArborResult<()>;

    async fn dependency_delete(
        &self,
        tree_id: TreeId,
        dependency_id: DependencyId,
    ) -> ArborResult<()>;

    // === Search index ===

    /// Store the embedding of a node's indexed text.
    async fn embedding_upsert(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        embedding: &EmbeddingVector,
        content_hash: ContentHash,
    ) -> ArborResult<()>;

    /// Build a fresh snapshot of one tree.
    async fn load_snapshot(&self, tree_id: TreeId) -> ArborResult<TreeSnapshot> {
        let tree = self.tree_get(tree_id).await?.ok_or(ArborError::Storage(
            StorageError::NotFound {
                entity_type: EntityType::Tree,
                id: tree_id.as_uuid(),
            },
        ))?;
        Ok(TreeSnapshot::assemble(
            tree,
            self.block_list(tree_id).await?,
            self.node_list(tree_id).await?,
            self.content_list(tree_id).await?,
            self.link_list(tree_id).await?,
            self.attachment_list(tree_id).await?,
            self.dependency_list(tree_id).await?,
        ))
    }
}

// ============================================================================
// INDEX SCHEDULING
// ============================================================================

/// Receives notice that a node's indexed text (content, links, attachments)
/// changed.
pub trait IndexScheduler: Send + Sync {
    /// Queue a re-index of one node. Must return without waiting for it.
    fn schedule(&self, tree_id: TreeId, node_id: NodeId);
}

/// Scheduler that ignores every request, for deployments without embeddings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexScheduler;

impl IndexScheduler for NoopIndexScheduler {
    fn schedule(&self, _tree_id: TreeId, _node_id: NodeId) {}
}

pub(crate) fn not_found(entity_type: EntityType, id: impl EntityIdType) -> ArborError {
    ArborError::Storage(StorageError::NotFound {
        entity_type,
        id: id.as_uuid(),
    })
}
