//! In-memory document store

use crate::{not_found, BlockUpdate, DocumentStore, NodeUpdate};
use arbor_core::{
    ArborError, ArborResult, AttachmentId, Block, BlockId, ContentHash, DependencyId,
    EmbeddingVector, EntityType, LinkId, Node, NodeAttachment, NodeContent, NodeDependency,
    NodeId, NodeLink, StorageError, Tree, TreeExport, TreeId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> ArborResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ArborError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> ArborResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ArborError::Storage(StorageError::LockPoisoned))
}

fn already_exists(entity_type: EntityType) -> ArborError {
    ArborError::Storage(StorageError::InsertFailed {
        entity_type,
        reason: "already exists".to_string(),
    })
}

fn constraint(constraint: &str, reason: impl Into<String>) -> ArborError {
    ArborError::Storage(StorageError::ConstraintViolation {
        constraint: constraint.to_string(),
        reason: reason.into(),
    })
}

/// In-memory store, one map per collection.
///
/// Locks are always taken in declaration order when more than one is needed.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    trees: RwLock<HashMap<TreeId, Tree>>,
    blocks: RwLock<HashMap<BlockId, Block>>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    contents: RwLock<HashMap<NodeId, NodeContent>>,
    links: RwLock<HashMap<LinkId, NodeLink>>,
    attachments: RwLock<HashMap<AttachmentId, NodeAttachment>>,
    dependencies: RwLock<HashMap<DependencyId, NodeDependency>>,
    embeddings: RwLock<HashMap<NodeId, (EmbeddingVector, ContentHash)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an exported tree.
    pub fn import(&self, export: TreeExport) -> ArborResult<TreeId> {
        let tree = export.tree_row();
        let tree_id = tree.tree_id;
        let rows = export.into_rows();

        let mut trees = write(&self.trees)?;
        if trees.contains_key(&tree_id) {
            return Err(already_exists(EntityType::Tree));
        }
        trees.insert(tree_id, tree);
        write(&self.blocks)?.extend(rows.blocks.into_iter().map(|b| (b.block_id, b)));
        write(&self.nodes)?.extend(rows.nodes.into_iter().map(|n| (n.node_id, n)));
        write(&self.contents)?.extend(rows.contents.into_iter().map(|c| (c.node_id, c)));
        write(&self.links)?.extend(rows.links.into_iter().map(|l| (l.link_id, l)));
        write(&self.attachments)?
            .extend(rows.attachments.into_iter().map(|a| (a.attachment_id, a)));
        write(&self.dependencies)?
            .extend(rows.dependencies.into_iter().map(|d| (d.dependency_id, d)));
        Ok(tree_id)
    }

    pub fn tree_ids(&self) -> Vec<TreeId> {
        read(&self.trees)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Stored embedding of a node, if any.
    pub fn embedding(&self, node_id: NodeId) -> Option<EmbeddingVector> {
        read(&self.embeddings)
            .ok()?
            .get(&node_id)
            .map(|(e, _)| e.clone())
    }

    pub fn embedding_count(&self) -> usize {
        read(&self.embeddings).map(|e| e.len()).unwrap_or(0)
    }

    fn ensure_block(&self, tree_id: TreeId, block_id: BlockId) -> ArborResult<()> {
        match read(&self.blocks)?.get(&block_id) {
            Some(b) if b.tree_id == tree_id => Ok(()),
            _ => Err(constraint(
                "node_block_fk",
                format!("block {} is not part of tree {}", block_id, tree_id),
            )),
        }
    }

    fn ensure_node(&self, tree_id: TreeId, node_id: NodeId) -> ArborResult<()> {
        match read(&self.nodes)?.get(&node_id) {
            Some(n) if n.tree_id == tree_id => Ok(()),
            _ => Err(constraint(
                "node_fk",
                format!("node {} is not part of tree {}", node_id, tree_id),
            )),
        }
    }

    /// Remove a node's child rows. Caller holds no locks.
    fn purge_node_children(&self, node_ids: &[NodeId]) -> ArborResult<()> {
        let mut contents = write(&self.contents)?;
        let mut links = write(&self.links)?;
        let mut attachments = write(&self.attachments)?;
        let mut dependencies = write(&self.dependencies)?;
        let mut embeddings = write(&self.embeddings)?;
        for id in node_ids {
            contents.remove(id);
            embeddings.remove(id);
        }
        links.retain(|_, l| !node_ids.contains(&l.node_id));
        attachments.retain(|_, a| !node_ids.contains(&a.node_id));
        dependencies
            .retain(|_, d| !node_ids.contains(&d.from_node_id) && !node_ids.contains(&d.to_node_id));
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    // === Trees ===

    async fn tree_get(&self, tree_id: TreeId) -> ArborResult<Option<Tree>> {
        Ok(read(&self.trees)?.get(&tree_id).cloned())
    }

    async fn tree_insert(&self, tree: &Tree) -> ArborResult<()> {
        let mut trees = write(&self.trees)?;
        if trees.contains_key(&tree.tree_id) {
            return Err(already_exists(EntityType::Tree));
        }
        trees.insert(tree.tree_id, tree.clone());
        Ok(())
    }

    // === Blocks ===

    async fn block_list(&self, tree_id: TreeId) -> ArborResult<Vec<Block>> {
        Ok(read(&self.blocks)?
            .values()
            .filter(|b| b.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn block_insert(&self, block: &Block) -> ArborResult<()> {
        if !read(&self.trees)?.contains_key(&block.tree_id) {
            return Err(not_found(EntityType::Tree, block.tree_id));
        }
        let mut blocks = write(&self.blocks)?;
        if blocks.contains_key(&block.block_id) {
            return Err(already_exists(EntityType::Block));
        }
        blocks.insert(block.block_id, block.clone());
        Ok(())
    }

    async fn block_update(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        update: BlockUpdate,
    ) -> ArborResult<Block> {
        let mut blocks = write(&self.blocks)?;
        let block = blocks
            .get_mut(&block_id)
            .filter(|b| b.tree_id == tree_id)
            .ok_or_else(|| not_found(EntityType::Block, block_id))?;

        if let Some(name) = update.name {
            block.name = name;
        }
        if let Some(description) = update.description {
            block.description = Some(description);
        }
        if let Some(block_type) = update.block_type {
            block.block_type = block_type;
        }
        if let Some(position) = update.position {
            block.position = position;
        }
        Ok(block.clone())
    }

    async fn block_delete(&self, tree_id: TreeId, block_id: BlockId) -> ArborResult<()> {
        {
            let mut blocks = write(&self.blocks)?;
            match blocks.get(&block_id) {
                Some(b) if b.tree_id == tree_id => {
                    blocks.remove(&block_id);
                }
                _ => return Err(not_found(EntityType::Block, block_id)),
            }
        }
        let removed: Vec<NodeId> = {
            let mut nodes = write(&self.nodes)?;
            let ids: Vec<NodeId> = nodes
                .values()
                .filter(|n| n.block_id == block_id)
                .map(|n| n.node_id)
                .collect();
            for id in &ids {
                nodes.remove(id);
            }
            ids
        };
        self.purge_node_children(&removed)
    }

    async fn block_shift_positions(
        &self,
        tree_id: TreeId,
        from: i32,
        delta: i32,
    ) -> ArborResult<()> {
        for block in write(&self.blocks)?
            .values_mut()
            .filter(|b| b.tree_id == tree_id && b.position >= from)
        {
            block.position += delta;
        }
        Ok(())
    }

    // === Nodes ===

    async fn node_list(&self, tree_id: TreeId) -> ArborResult<Vec<Node>> {
        Ok(read(&self.nodes)?
            .values()
            .filter(|n| n.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn node_insert(&self, node: &Node) -> ArborResult<()> {
        self.ensure_block(node.tree_id, node.block_id)?;
        let mut nodes = write(&self.nodes)?;
        if nodes.contains_key(&node.node_id) {
            return Err(already_exists(EntityType::Node));
        }
        nodes.insert(node.node_id, node.clone());
        Ok(())
    }

    async fn node_update(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> ArborResult<Node> {
        if let Some(block_id) = update.block_id {
            self.ensure_block(tree_id, block_id)?;
        }
        let mut nodes = write(&self.nodes)?;
        let node = nodes
            .get_mut(&node_id)
            .filter(|n| n.tree_id == tree_id)
            .ok_or_else(|| not_found(EntityType::Node, node_id))?;

        if let Some(name) = update.name {
            node.name = name;
        }
        if let Some(description) = update.description {
            node.description = Some(description);
        }
        if let Some(node_type) = update.node_type {
            node.node_type = node_type;
        }
        if let Some(status) = update.status {
            node.status = status;
        }
        if let Some(confidence) = update.confidence {
            node.confidence = Some(confidence);
        }
        if let Some(block_id) = update.block_id {
            node.block_id = block_id;
        }
        if let Some(position) = update.position {
            node.position = position;
        }
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    async fn node_delete(&self, tree_id: TreeId, node_id: NodeId) -> ArborResult<()> {
        {
            let mut nodes = write(&self.nodes)?;
            match nodes.get(&node_id) {
                Some(n) if n.tree_id == tree_id => {
                    nodes.remove(&node_id);
                }
                _ => return Err(not_found(EntityType::Node, node_id)),
            }
        }
        self.purge_node_children(&[node_id])
    }

    async fn node_restore(&self, node: &Node) -> ArborResult<()> {
        self.ensure_block(node.tree_id, node.block_id)?;
        let mut nodes = write(&self.nodes)?;
        let slot = nodes
            .get_mut(&node.node_id)
            .filter(|n| n.tree_id == node.tree_id)
            .ok_or_else(|| not_found(EntityType::Node, node.node_id))?;
        *slot = node.clone();
        Ok(())
    }

    async fn node_shift_positions(
        &self,
        tree_id: TreeId,
        block_id: BlockId,
        from: i32,
        delta: i32,
    ) -> ArborResult<()> {
        for node in write(&self.nodes)?.values_mut().filter(|n| {
            n.tree_id == tree_id && n.block_id == block_id && n.position >= from
        }) {
            node.position += delta;
        }
        Ok(())
    }

    // === Node content ===

    async fn content_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeContent>> {
        Ok(read(&self.contents)?
            .values()
            .filter(|c| c.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn content_upsert(&self, content: &NodeContent) -> ArborResult<()> {
        if !read(&self.nodes)?
            .get(&content.node_id)
            .is_some_and(|n| n.tree_id == content.tree_id)
        {
            return Err(not_found(EntityType::Node, content.node_id));
        }
        write(&self.contents)?.insert(content.node_id, content.clone());
        Ok(())
    }

    // === Links ===

    async fn link_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeLink>> {
        Ok(read(&self.links)?
            .values()
            .filter(|l| l.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn link_insert(&self, link: &NodeLink) -> ArborResult<()> {
        self.ensure_node(link.tree_id, link.node_id)?;
        let mut links = write(&self.links)?;
        if links.contains_key(&link.link_id) {
            return Err(already_exists(EntityType::NodeLink));
        }
        links.insert(link.link_id, link.clone());
        Ok(())
    }

    async fn link_delete(&self, tree_id: TreeId, link_id: LinkId) -> ArborResult<()> {
        let mut links = write(&self.links)?;
        match links.get(&link_id) {
            Some(l) if l.tree_id == tree_id => {
                links.remove(&link_id);
                Ok(())
            }
            _ => Err(not_found(EntityType::NodeLink, link_id)),
        }
    }

    // === Attachments ===

    async fn attachment_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeAttachment>> {
        Ok(read(&self.attachments)?
            .values()
            .filter(|a| a.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn attachment_insert(&self, attachment: &NodeAttachment) -> ArborResult<()> {
        self.ensure_node(attachment.tree_id, attachment.node_id)?;
        let mut attachments = write(&self.attachments)?;
        if attachments.contains_key(&attachment.attachment_id) {
            return Err(already_exists(EntityType::NodeAttachment));
        }
        attachments.insert(attachment.attachment_id, attachment.clone());
        Ok(())
    }

    async fn attachment_delete(
        &self,
        tree_id: TreeId,
        attachment_id: AttachmentId,
    ) -> ArborResult<()> {
        let mut attachments = write(&self.attachments)?;
        match attachments.get(&attachment_id) {
            Some(a) if a.tree_id == tree_id => {
                attachments.remove(&attachment_id);
                Ok(())
            }
            _ => Err(not_found(EntityType::NodeAttachment, attachment_id)),
        }
    }

    // === Dependencies ===

    async fn dependency_list(&self, tree_id: TreeId) -> ArborResult<Vec<NodeDependency>> {
        Ok(read(&self.dependencies)?
            .values()
            .filter(|d| d.tree_id == tree_id)
            .cloned()
            .collect())
    }

    async fn dependency_insert(&self, dependency: &NodeDependency) -> ArborResult<()> {
        if dependency.from_node_id == dependency.to_node_id {
            return Err(constraint("dependency_no_self", "a node cannot depend on itself"));
        }
        self.ensure_node(dependency.tree_id, dependency.from_node_id)?;
        self.ensure_node(dependency.tree_id, dependency.to_node_id)?;
        let mut dependencies = write(&self.dependencies)?;
        if dependencies.contains_key(&dependency.dependency_id) {
            return Err(already_exists(EntityType::NodeDependency));
        }
        dependencies.insert(dependency.dependency_id, dependency.clone());
        Ok(())
    }

    async fn dependency_delete(
        &self,
        tree_id: TreeId,
        dependency_id: DependencyId,
    ) -> ArborResult<()> {
        let mut dependencies = write(&self.dependencies)?;
        match dependencies.get(&dependency_id) {
            Some(d) if d.tree_id == tree_id => {
                dependencies.remove(&dependency_id);
                Ok(())
            }
            _ => Err(not_found(EntityType::NodeDependency, dependency_id)),
        }
    }

    // === Search index ===

    async fn embedding_upsert(
        &self,
        tree_id: TreeId,
        node_id: NodeId,
        embedding: &EmbeddingVector,
        content_hash: ContentHash,
    ) -> ArborResult<()> {
        self.ensure_node(tree_id, node_id)?;
        write(&self.embeddings)?.insert(node_id, (embedding.clone(), content_hash));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{compute_content_hash, DependencyType, EntityIdType};

    struct Seeded {
        store: InMemoryStore,
        tree: TreeId,
        block: BlockId,
        a: NodeId,
        b: NodeId,
    }

    async fn seeded() -> Seeded {
        let store = InMemoryStore::new();
        let tree = Tree::new("Experiment");
        store.tree_insert(&tree).await.unwrap();
        let block = Block::new(tree.tree_id, "Protocol", 0);
        store.block_insert(&block).await.unwrap();
        let a = Node::new(tree.tree_id, block.block_id, "Step A", 0);
        let b = Node::new(tree.tree_id, block.block_id, "Step B", 1);
        store.node_insert(&a).await.unwrap();
        store.node_insert(&b).await.unwrap();
        Seeded {
            store,
            tree: tree.tree_id,
            block: block.block_id,
            a: a.node_id,
            b: b.node_id,
        }
    }

    #[tokio::test]
    async fn test_snapshot_reflects_inserts() {
        let s = seeded().await;
        let snapshot = s.store.load_snapshot(s.tree).await.unwrap();
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.blocks()[0].nodes[1].name(), "Step B");
    }

    #[tokio::test]
    async fn test_missing_tree_snapshot_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.load_snapshot(TreeId::now_v7()).await.unwrap_err();
        assert!(matches!(
            err,
            ArborError::Storage(StorageError::NotFound { entity_type: EntityType::Tree, .. })
        ));
    }

    #[tokio::test]
    async fn test_update_is_tree_scoped() {
        let s = seeded().await;
        let other = TreeId::now_v7();
        let err = s
            .store
            .node_update(other, s.a, NodeUpdate { name: Some("x".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::Storage(StorageError::NotFound { .. })));

        let node = s
            .store
            .node_update(s.tree, s.a, NodeUpdate { name: Some("Alpha".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(node.name, "Alpha");
    }

    #[tokio::test]
    async fn test_node_restore_overwrites_row() {
        let s = seeded().await;
        let original = s
            .store
            .node_list(s.tree)
            .await
            .unwrap()
            .into_iter()
            .find(|n| n.node_id == s.a)
            .unwrap();
        s.store
            .node_update(
                s.tree,
                s.a,
                NodeUpdate {
                    description: Some("changed".into()),
                    position: Some(-1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        s.store.node_restore(&original).await.unwrap();
        let nodes = s.store.node_list(s.tree).await.unwrap();
        assert_eq!(nodes.iter().find(|n| n.node_id == s.a), Some(&original));

        let ghost = Node::new(s.tree, s.block, "Ghost", 9);
        assert!(s.store.node_restore(&ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_node_delete_cascades() {
        let s = seeded().await;
        s.store
            .content_upsert(&NodeContent {
                node_id: s.a,
                tree_id: s.tree,
                content: "text".into(),
                summary: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        s.store
            .dependency_insert(&NodeDependency {
                dependency_id: DependencyId::now_v7(),
                tree_id: s.tree,
                from_node_id: s.b,
                to_node_id: s.a,
                dependency_type: DependencyType::Requires,
                evidence_text: None,
                confidence: None,
            })
            .await
            .unwrap();

        s.store.node_delete(s.tree, s.a).await.unwrap();
        assert!(s.store.content_list(s.tree).await.unwrap().is_empty());
        assert!(s.store.dependency_list(s.tree).await.unwrap().is_empty());
        assert!(s.store.node_delete(s.tree, s.a).await.is_err());
    }

    #[tokio::test]
    async fn test_block_delete_removes_nodes() {
        let s = seeded().await;
        s.store.block_delete(s.tree, s.block).await.unwrap();
        assert!(s.store.node_list(s.tree).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_insert_requires_block_in_tree() {
        let s = seeded().await;
        let stray = Node::new(s.tree, BlockId::now_v7(), "Stray", 0);
        let err = s.store.node_insert(&stray).await.unwrap_err();
        assert!(matches!(err, ArborError::Storage(StorageError::ConstraintViolation { .. })));
    }

    #[tokio::test]
    async fn test_shift_positions() {
        let s = seeded().await;
        s.store.node_shift_positions(s.tree, s.block, 1, 1).await.unwrap();
        let nodes = s.store.node_list(s.tree).await.unwrap();
        let b = nodes.iter().find(|n| n.node_id == s.b).unwrap();
        let a = nodes.iter().find(|n| n.node_id == s.a).unwrap();
        assert_eq!((a.position, b.position), (0, 2));
    }

    #[tokio::test]
    async fn test_self_dependency_rejected() {
        let s = seeded().await;
        let dep = NodeDependency {
            dependency_id: DependencyId::now_v7(),
            tree_id: s.tree,
            from_node_id: s.a,
            to_node_id: s.a,
            dependency_type: DependencyType::Follows,
            evidence_text: None,
            confidence: None,
        };
        assert!(s.store.dependency_insert(&dep).await.is_err());
    }

    #[tokio::test]
    async fn test_import_round_trip_and_embeddings() {
        let s = seeded().await;
        let export = TreeExport::from_snapshot(&s.store.load_snapshot(s.tree).await.unwrap());

        let copy = InMemoryStore::new();
        let tree_id = copy.import(export.clone()).unwrap();
        assert_eq!(tree_id, s.tree);
        assert_eq!(copy.load_snapshot(tree_id).await.unwrap().node_count(), 2);
        assert!(copy.import(export).is_err());

        let vector = EmbeddingVector::new(vec![1.0, 0.0], "mock");
        copy.embedding_upsert(tree_id, s.a, &vector, compute_content_hash(b"x"))
            .await
            .unwrap();
        assert_eq!(copy.embedding(s.a), Some(vector));
        assert_eq!(copy.embedding_count(), 1);
    }
}
