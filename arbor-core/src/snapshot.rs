//! Read-only tree snapshot.
//!
//! A snapshot is assembled once per request from the store's collections and
//! never mutated afterwards. Blocks are ordered by position, nodes by position
//! within their block, so iteration order is the canonical "tree order".

use crate::{
    Block, BlockId, Node, NodeAttachment, NodeContent, NodeDependency, NodeId, NodeLink, Tree,
    TreeId,
};
use serde::Serialize;
use std::collections::HashMap;

/// A node joined with its content, links, attachments and outgoing dependencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub content: Option<String>,
    pub links: Vec<NodeLink>,
    pub attachments: Vec<NodeAttachment>,
    pub dependencies: Vec<NodeDependency>,
}

impl NodeView {
    pub fn id(&self) -> NodeId {
        self.node.node_id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// True when the node carries content that is not just whitespace.
    pub fn has_content(&self) -> bool {
        self.content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A block with its nodes in position order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: Block,
    pub nodes: Vec<NodeView>,
}

impl BlockView {
    pub fn id(&self) -> BlockId {
        self.block.block_id
    }

    pub fn name(&self) -> &str {
        &self.block.name
    }
}

/// In-memory, read-only representation of one tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    tree: Tree,
    blocks: Vec<BlockView>,
    #[serde(skip)]
    block_index: HashMap<BlockId, usize>,
    #[serde(skip)]
    node_index: HashMap<NodeId, (usize, usize)>,
}

impl TreeSnapshot {
    /// Join the raw collections of one tree into a snapshot.
    ///
    /// Nodes whose block is not part of `blocks` are dropped, as are
    /// content/link/attachment/dependency rows whose node is unknown.
    pub fn assemble(
        tree: Tree,
        mut blocks: Vec<Block>,
        mut nodes: Vec<Node>,
        contents: Vec<NodeContent>,
        links: Vec<NodeLink>,
        attachments: Vec<NodeAttachment>,
        dependencies: Vec<NodeDependency>,
    ) -> Self {
        blocks.sort_by_key(|b| b.position);
        nodes.sort_by_key(|n| n.position);

        let mut content_by_node: HashMap<NodeId, String> = contents
            .into_iter()
            .map(|c| (c.node_id, c.content))
            .collect();
        let mut links_by_node: HashMap<NodeId, Vec<NodeLink>> = HashMap::new();
        for link in links {
            links_by_node.entry(link.node_id).or_default().push(link);
        }
        let mut attachments_by_node: HashMap<NodeId, Vec<NodeAttachment>> = HashMap::new();
        for attachment in attachments {
            attachments_by_node
                .entry(attachment.node_id)
                .or_default()
                .push(attachment);
        }
        let mut deps_by_node: HashMap<NodeId, Vec<NodeDependency>> = HashMap::new();
        for dep in dependencies {
            deps_by_node.entry(dep.from_node_id).or_default().push(dep);
        }

        let mut block_views: Vec<BlockView> = blocks
            .into_iter()
            .map(|block| BlockView {
                block,
                nodes: Vec::new(),
            })
            .collect();
        let block_index: HashMap<BlockId, usize> = block_views
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id(), i))
            .collect();

        for node in nodes {
            let Some(&bi) = block_index.get(&node.block_id) else {
                continue;
            };
            let id = node.node_id;
            block_views[bi].nodes.push(NodeView {
                content: content_by_node.remove(&id),
                links: links_by_node.remove(&id).unwrap_or_default(),
                attachments: attachments_by_node.remove(&id).unwrap_or_default(),
                dependencies: deps_by_node.remove(&id).unwrap_or_default(),
                node,
            });
        }

        let mut node_index = HashMap::new();
        for (bi, block) in block_views.iter().enumerate() {
            for (ni, node) in block.nodes.iter().enumerate() {
                node_index.insert(node.id(), (bi, ni));
            }
        }

        Self {
            tree,
            blocks: block_views,
            block_index,
            node_index,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree.tree_id
    }

    /// Blocks in position order.
    pub fn blocks(&self) -> &[BlockView] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockView> {
        self.block_index.get(&id).map(|&i| &self.blocks[i])
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeView> {
        self.node_index
            .get(&id)
            .map(|&(bi, ni)| &self.blocks[bi].nodes[ni])
    }

    /// The block that owns `node_id`.
    pub fn block_of(&self, node_id: NodeId) -> Option<&BlockView> {
        self.node_index.get(&node_id).map(|&(bi, _)| &self.blocks[bi])
    }

    /// All nodes in tree order: block position, then node position.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &NodeView> + '_ {
        self.blocks.iter().flat_map(|b| b.nodes.iter())
    }

    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Nodes whose content is absent or whitespace-only, in tree order.
    pub fn empty_content_nodes(&self) -> Vec<&NodeView> {
        self.nodes_in_order().filter(|n| !n.has_content()).collect()
    }

    /// Rank of a node in tree order, used to sort operations deterministically.
    pub fn tree_order_rank(&self, node_id: NodeId) -> Option<usize> {
        let &(bi, ni) = self.node_index.get(&node_id)?;
        let before: usize = self.blocks[..bi].iter().map(|b| b.nodes.len()).sum();
        Some(before + ni)
    }

    /// Position a newly appended node would take in `block_id`.
    pub fn next_node_position(&self, block_id: BlockId) -> i32 {
        self.block(block_id)
            .and_then(|b| b.nodes.iter().map(|n| n.node.position).max())
            .map(|p| p + 1)
            .unwrap_or(0)
    }

    /// Position a newly appended block would take.
    pub fn next_block_position(&self) -> i32 {
        self.blocks
            .iter()
            .map(|b| b.block.position)
            .max()
            .map(|p| p + 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityIdType, LinkId};
    use chrono::Utc;

    fn sample() -> (TreeSnapshot, Vec<NodeId>) {
        let tree = Tree::new("Experiment");
        let results = Block::new(tree.tree_id, "Results", 1);
        let protocol = Block::new(tree.tree_id, "Protocol", 0);
        let step_b = Node::new(tree.tree_id, protocol.block_id, "Step B", 1);
        let step_a = Node::new(tree.tree_id, protocol.block_id, "Step A", 0);
        let step_c = Node::new(tree.tree_id, results.block_id, "Step C", 0);
        let ids = vec![step_a.node_id, step_b.node_id, step_c.node_id];
        let content = NodeContent {
            node_id: step_b.node_id,
            tree_id: tree.tree_id,
            content: "done".to_string(),
            summary: None,
            updated_at: Utc::now(),
        };
        let whitespace = NodeContent {
            node_id: step_c.node_id,
            tree_id: tree.tree_id,
            content: "   \n".to_string(),
            summary: None,
            updated_at: Utc::now(),
        };
        let link = NodeLink {
            link_id: LinkId::now_v7(),
            node_id: step_a.node_id,
            tree_id: tree.tree_id,
            name: "Docs".to_string(),
            url: "https://example.org".to_string(),
            description: None,
            link_type: None,
        };
        let snapshot = TreeSnapshot::assemble(
            tree,
            vec![results, protocol],
            vec![step_c, step_b, step_a],
            vec![content, whitespace],
            vec![link],
            vec![],
            vec![],
        );
        (snapshot, ids)
    }

    #[test]
    fn test_assemble_orders_blocks_and_nodes() {
        let (snapshot, ids) = sample();
        let names: Vec<&str> = snapshot.blocks().iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["Protocol", "Results"]);
        let order: Vec<NodeId> = snapshot.nodes_in_order().map(|n| n.id()).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_empty_content_treats_whitespace_as_empty() {
        let (snapshot, ids) = sample();
        let empty: Vec<NodeId> = snapshot.empty_content_nodes().iter().map(|n| n.id()).collect();
        assert_eq!(empty, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_lookup_helpers() {
        let (snapshot, ids) = sample();
        assert_eq!(snapshot.node_count(), 3);
        assert_eq!(snapshot.block_of(ids[2]).unwrap().name(), "Results");
        assert_eq!(snapshot.node(ids[0]).unwrap().links.len(), 1);
        assert_eq!(snapshot.tree_order_rank(ids[2]), Some(2));
        assert_eq!(snapshot.next_block_position(), 2);
        let protocol = snapshot.blocks()[0].id();
        assert_eq!(snapshot.next_node_position(protocol), 2);
    }

    #[test]
    fn test_orphan_nodes_are_dropped() {
        let tree = Tree::new("t");
        let orphan = Node::new(tree.tree_id, BlockId::now_v7(), "lost", 0);
        let snapshot = TreeSnapshot::assemble(tree, vec![], vec![orphan], vec![], vec![], vec![], vec![]);
        assert_eq!(snapshot.node_count(), 0);
    }
}
