//! Flat JSON export of a whole tree
//!
//! The export denormalises every node with its block name, content, links,
//! attachments and dependencies, in tree order, plus summary counts. It is
//! also the seed format the in-memory store imports.

use crate::{
    AttachmentId, Block, BlockId, DependencyId, DependencyType, LinkId, Node, NodeAttachment,
    NodeContent, NodeDependency, NodeId, NodeLink, NodeStatus, Timestamp, Tree, TreeId,
    TreeSnapshot,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Accept a confidence written either as a number or as a numeric string.
fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f32),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(v)) => Some(v),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTree {
    pub id: TreeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedBlock {
    pub id: BlockId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub position: i32,
    #[serde(default = "default_type")]
    pub block_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedAttachment {
    pub id: AttachmentId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    pub file_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedLink {
    pub id: LinkId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedDependency {
    pub id: DependencyId,
    pub to_node_id: NodeId,
    #[serde(default)]
    pub to_node_name: Option<String>,
    #[serde(default)]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub evidence_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_type")]
    pub node_type: String,
    pub position: i32,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub confidence: Option<f32>,
    pub block_id: BlockId,
    #[serde(default)]
    pub block_name: String,
    /// Empty string when the node has no content.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<ExportedAttachment>,
    #[serde(default)]
    pub links: Vec<ExportedLink>,
    #[serde(default)]
    pub dependencies: Vec<ExportedDependency>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total_nodes: usize,
    pub total_blocks: usize,
    pub total_dependencies: usize,
    pub total_attachments: usize,
    pub total_links: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub nodes_by_block: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeExport {
    pub tree: ExportedTree,
    pub blocks: Vec<ExportedBlock>,
    pub nodes: Vec<ExportedNode>,
    #[serde(default)]
    pub summary: ExportSummary,
}

/// Normalised rows of one tree, ready to insert into a store.
#[derive(Debug, Clone, Default)]
pub struct TreeRows {
    pub blocks: Vec<Block>,
    pub nodes: Vec<Node>,
    pub contents: Vec<NodeContent>,
    pub links: Vec<NodeLink>,
    pub attachments: Vec<NodeAttachment>,
    pub dependencies: Vec<NodeDependency>,
}

fn default_type() -> String {
    "custom".to_string()
}

impl TreeExport {
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Self {
        let tree = snapshot.tree();
        let mut summary = ExportSummary {
            total_blocks: snapshot.block_count(),
            ..Default::default()
        };

        let mut nodes = Vec::with_capacity(snapshot.node_count());
        for block in snapshot.blocks() {
            for view in &block.nodes {
                let node = &view.node;
                summary.total_nodes += 1;
                summary.total_links += view.links.len();
                summary.total_attachments += view.attachments.len();
                summary.total_dependencies += view.dependencies.len();
                *summary.nodes_by_type.entry(node.node_type.clone()).or_default() += 1;
                *summary.nodes_by_block.entry(block.name().to_string()).or_default() += 1;

                nodes.push(ExportedNode {
                    id: node.node_id,
                    name: node.name.clone(),
                    description: node.description.clone(),
                    node_type: node.node_type.clone(),
                    position: node.position,
                    status: node.status,
                    confidence: node.confidence,
                    block_id: block.id(),
                    block_name: block.name().to_string(),
                    content: view.content.clone().unwrap_or_default(),
                    attachments: view
                        .attachments
                        .iter()
                        .map(|a| ExportedAttachment {
                            id: a.attachment_id,
                            name: a.name.clone(),
                            description: a.description.clone(),
                            file_type: a.file_type.clone(),
                            file_url: a.file_url.clone(),
                        })
                        .collect(),
                    links: view
                        .links
                        .iter()
                        .map(|l| ExportedLink {
                            id: l.link_id,
                            name: l.name.clone(),
                            url: l.url.clone(),
                            description: l.description.clone(),
                            link_type: l.link_type.clone(),
                        })
                        .collect(),
                    dependencies: view
                        .dependencies
                        .iter()
                        .map(|d| ExportedDependency {
                            id: d.dependency_id,
                            to_node_id: d.to_node_id,
                            to_node_name: snapshot.node(d.to_node_id).map(|n| n.name().to_string()),
                            dependency_type: d.dependency_type,
                            evidence_text: d.evidence_text.clone(),
                            confidence: d.confidence,
                        })
                        .collect(),
                });
            }
        }

        Self {
            tree: ExportedTree {
                id: tree.tree_id,
                name: tree.name.clone(),
                description: tree.description.clone(),
                status: Some(tree.status.clone()),
                node_count: summary.total_nodes,
                created_at: Some(tree.created_at),
            },
            blocks: snapshot
                .blocks()
                .iter()
                .map(|b| ExportedBlock {
                    id: b.id(),
                    name: b.block.name.clone(),
                    description: b.block.description.clone(),
                    position: b.block.position,
                    block_type: b.block.block_type.clone(),
                })
                .collect(),
            nodes,
            summary,
        }
    }

    /// The exported tree row.
    pub fn tree_row(&self) -> Tree {
        Tree {
            tree_id: self.tree.id,
            name: self.tree.name.clone(),
            description: self.tree.description.clone(),
            status: self.tree.status.clone().unwrap_or_else(|| "draft".to_string()),
            created_at: self.tree.created_at.unwrap_or_else(Utc::now),
        }
    }

    /// Split the export back into per-collection rows. Empty content strings
    /// produce no content row.
    pub fn into_rows(self) -> TreeRows {
        let tree_id = self.tree.id;
        let now = Utc::now();
        let mut rows = TreeRows {
            blocks: self
                .blocks
                .into_iter()
                .map(|b| Block {
                    block_id: b.id,
                    tree_id,
                    name: b.name,
                    description: b.description,
                    block_type: b.block_type,
                    position: b.position,
                })
                .collect(),
            ..Default::default()
        };

        for n in self.nodes {
            if !n.content.is_empty() {
                rows.contents.push(NodeContent {
                    node_id: n.id,
                    tree_id,
                    content: n.content,
                    summary: None,
                    updated_at: now,
                });
            }
            rows.links.extend(n.links.into_iter().map(|l| NodeLink {
                link_id: l.id,
                node_id: n.id,
                tree_id,
                name: l.name,
                url: l.url,
                description: l.description,
                link_type: l.link_type,
            }));
            rows.attachments
                .extend(n.attachments.into_iter().map(|a| NodeAttachment {
                    attachment_id: a.id,
                    node_id: n.id,
                    tree_id,
                    name: a.name,
                    file_url: a.file_url,
                    file_type: a.file_type,
                    description: a.description,
                }));
            rows.dependencies
                .extend(n.dependencies.into_iter().map(|d| NodeDependency {
                    dependency_id: d.id,
                    tree_id,
                    from_node_id: n.id,
                    to_node_id: d.to_node_id,
                    dependency_type: d.dependency_type,
                    evidence_text: d.evidence_text,
                    confidence: d.confidence,
                }));
            rows.nodes.push(Node {
                node_id: n.id,
                tree_id,
                block_id: n.block_id,
                name: n.name,
                description: n.description,
                node_type: n.node_type,
                position: n.position,
                status: n.status,
                confidence: n.confidence,
                updated_at: now,
            });
        }
        rows
    }
}
