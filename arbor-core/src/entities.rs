//! Core entity structures
//!
//! One struct per store collection. Rows reference their owning tree so every
//! store call can be scoped by `tree_id`.

use crate::{
    AttachmentId, BlockId, DependencyId, DependencyType, EntityIdType, LinkId, NodeId, NodeStatus,
    Timestamp, TreeId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Tree - root container owning an ordered sequence of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub tree_id: TreeId,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: Timestamp,
}

impl Tree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tree_id: TreeId::now_v7(),
            name: name.into(),
            description: None,
            status: "draft".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Block - named, ordered, typed grouping of nodes within a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: BlockId,
    pub tree_id: TreeId,
    pub name: String,
    pub description: Option<String>,
    pub block_type: String,
    /// Unique within the tree; defines display and processing order.
    pub position: i32,
}

impl Block {
    pub fn new(tree_id: TreeId, name: impl Into<String>, position: i32) -> Self {
        Self {
            block_id: BlockId::now_v7(),
            tree_id,
            name: name.into(),
            description: None,
            block_type: "custom".to_string(),
            position,
        }
    }
}

/// Node - the addressable unit of work.
///
/// Textual content, links, attachments and dependencies live in their own
/// collections and are joined in [`crate::NodeView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub tree_id: TreeId,
    pub block_id: BlockId,
    pub name: String,
    pub description: Option<String>,
    pub node_type: String,
    /// Unique within the owning block.
    pub position: i32,
    pub status: NodeStatus,
    pub confidence: Option<f32>,
    pub updated_at: Timestamp,
}

impl Node {
    pub fn new(tree_id: TreeId, block_id: BlockId, name: impl Into<String>, position: i32) -> Self {
        Self {
            node_id: NodeId::now_v7(),
            tree_id,
            block_id,
            name: name.into(),
            description: None,
            node_type: "custom".to_string(),
            position,
            status: NodeStatus::Draft,
            confidence: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }
}

/// Free-text content of a node (one row per node at most).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContent {
    pub node_id: NodeId,
    pub tree_id: TreeId,
    pub content: String,
    /// One-line summary written alongside generated content.
    #[serde(default)]
    pub summary: Option<String>,
    pub updated_at: Timestamp,
}

impl NodeContent {
    pub fn new(tree_id: TreeId, node_id: NodeId, content: impl Into<String>) -> Self {
        Self {
            node_id,
            tree_id,
            content: content.into(),
            summary: None,
            updated_at: Utc::now(),
        }
    }
}

/// Named URL attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLink {
    pub link_id: LinkId,
    pub node_id: NodeId,
    pub tree_id: TreeId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub link_type: Option<String>,
}

/// File reference attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttachment {
    pub attachment_id: AttachmentId,
    pub node_id: NodeId,
    pub tree_id: TreeId,
    pub name: String,
    pub file_url: String,
    pub file_type: Option<String>,
    pub description: Option<String>,
}

/// Typed, directed dependency from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDependency {
    pub dependency_id: DependencyId,
    pub tree_id: TreeId,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub dependency_type: DependencyType,
    pub evidence_text: Option<String>,
    pub confidence: Option<f32>,
}
