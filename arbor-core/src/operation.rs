//! Operations - the atomic unit of change applied to a tree.

use crate::{BlockId, EntityIdType, EntityType, NodeId, OperationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Field name to new value.
pub type FieldChanges = serde_json::Map<String, Value>;

/// Reference to an entity by type and ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: Uuid,
}

// ============================================================================
// OPERATION TYPE CATALOG
// ============================================================================

/// Closed catalog of operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateNode,
    UpdateNode,
    DeleteNode,
    MoveNode,
    CreateBlock,
    UpdateBlock,
    DeleteBlock,
    ReorderBlocks,
    UpdateNodeContent,
    AddLink,
    RemoveLink,
    AddAttachment,
    RemoveAttachment,
    AddDependency,
    RemoveDependency,
}

/// Grouping used when collapsing operations on the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    NodeStructure,
    NodeContent,
    Block,
    BlockOrder,
    Link,
    Attachment,
    Dependency,
}

/// Which entity an operation's target must identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// The tree itself; nothing beyond the tree id is required.
    Tree,
    Block,
    Node,
}

impl OperationType {
    pub const ALL: [OperationType; 15] = [
        Self::CreateNode,
        Self::UpdateNode,
        Self::DeleteNode,
        Self::MoveNode,
        Self::CreateBlock,
        Self::UpdateBlock,
        Self::DeleteBlock,
        Self::ReorderBlocks,
        Self::UpdateNodeContent,
        Self::AddLink,
        Self::RemoveLink,
        Self::AddAttachment,
        Self::RemoveAttachment,
        Self::AddDependency,
        Self::RemoveDependency,
    ];

    /// Function name exposed to the language model.
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::CreateNode => "create_node",
            Self::UpdateNode => "update_node",
            Self::DeleteNode => "delete_node",
            Self::MoveNode => "move_node",
            Self::CreateBlock => "create_block",
            Self::UpdateBlock => "update_block",
            Self::DeleteBlock => "delete_block",
            Self::ReorderBlocks => "reorder_blocks",
            Self::UpdateNodeContent => "update_node_content",
            Self::AddLink => "add_link",
            Self::RemoveLink => "remove_link",
            Self::AddAttachment => "add_attachment",
            Self::RemoveAttachment => "remove_attachment",
            Self::AddDependency => "add_dependency",
            Self::RemoveDependency => "remove_dependency",
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.function_name() == name)
    }

    pub fn class(&self) -> OperationClass {
        match self {
            Self::CreateNode | Self::UpdateNode | Self::DeleteNode | Self::MoveNode => {
                OperationClass::NodeStructure
            }
            Self::UpdateNodeContent => OperationClass::NodeContent,
            Self::CreateBlock | Self::UpdateBlock | Self::DeleteBlock => OperationClass::Block,
            Self::ReorderBlocks => OperationClass::BlockOrder,
            Self::AddLink | Self::RemoveLink => OperationClass::Link,
            Self::AddAttachment | Self::RemoveAttachment => OperationClass::Attachment,
            Self::AddDependency | Self::RemoveDependency => OperationClass::Dependency,
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        match self {
            Self::CreateBlock | Self::ReorderBlocks => TargetKind::Tree,
            Self::CreateNode | Self::UpdateBlock | Self::DeleteBlock => TargetKind::Block,
            _ => TargetKind::Node,
        }
    }

    pub fn requires_target(&self) -> bool {
        self.target_kind() != TargetKind::Tree
    }

    /// Operations that bring a new entity into existence.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            Self::CreateNode
                | Self::CreateBlock
                | Self::AddLink
                | Self::AddAttachment
                | Self::AddDependency
        )
    }

    /// Operations whose effect changes the indexed text of a node.
    pub fn touches_index(&self) -> bool {
        matches!(
            self,
            Self::UpdateNodeContent
                | Self::AddLink
                | Self::RemoveLink
                | Self::AddAttachment
                | Self::RemoveAttachment
        )
    }

    /// Entity type of the child row a remove operation deletes.
    pub fn removed_item_type(&self) -> Option<EntityType> {
        match self {
            Self::RemoveLink => Some(EntityType::NodeLink),
            Self::RemoveAttachment => Some(EntityType::NodeAttachment),
            Self::RemoveDependency => Some(EntityType::NodeDependency),
            _ => None,
        }
    }
}

// ============================================================================
// OPERATION TARGET
// ============================================================================

/// What an operation acts on.
///
/// Resolved IDs are preferred; natural-language identifiers are carried
/// forward when resolution failed at generation time so execution can retry
/// against a fresher snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_identifier: Option<String>,
    /// Link, attachment or dependency id for remove operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
}

impl OperationTarget {
    pub fn node(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..Default::default()
        }
    }

    pub fn block(block_id: BlockId) -> Self {
        Self {
            block_id: Some(block_id),
            ..Default::default()
        }
    }

    pub fn is_resolved(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::Tree => true,
            TargetKind::Block => self.block_id.is_some(),
            TargetKind::Node => self.node_id.is_some(),
        }
    }

    /// True when there is either an id or an identifier for `kind`.
    pub fn has_reference(&self, kind: TargetKind) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        match kind {
            TargetKind::Tree => true,
            TargetKind::Block => self.block_id.is_some() || present(&self.block_identifier),
            TargetKind::Node => self.node_id.is_some() || present(&self.node_identifier),
        }
    }
}

// ============================================================================
// OPERATION
// ============================================================================

/// One atomic requested mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub target: OperationTarget,
    pub changes: FieldChanges,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<FieldChanges>,
    pub confidence: f32,
    pub reasoning: String,
}

impl Operation {
    pub fn new(operation_type: OperationType, target: OperationTarget) -> Self {
        Self {
            operation_id: OperationId::now_v7(),
            operation_type,
            target,
            changes: FieldChanges::new(),
            before: None,
            confidence: 1.0,
            reasoning: String::new(),
        }
    }

    pub fn with_change(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(field.into(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// String value of a changed field, if present.
    pub fn change_str(&self, field: &str) -> Option<&str> {
        self.changes.get(field).and_then(Value::as_str)
    }

    /// Whether the operation can ever be applied: it needs no target, or it
    /// carries an id or identifier for the target it needs.
    pub fn is_addressable(&self) -> bool {
        self.target.has_reference(self.operation_type.target_kind())
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_resolved(self.operation_type.target_kind())
    }

    /// Node this operation acts on, for node-scoped operations.
    pub fn target_node(&self) -> Option<NodeId> {
        match self.operation_type.target_kind() {
            TargetKind::Node => self.target.node_id,
            _ => None,
        }
    }

    /// Renames a node (update carrying a `name` change).
    pub fn renames_node(&self) -> bool {
        self.operation_type == OperationType::UpdateNode && self.changes.contains_key("name")
    }

    /// Writes node content, either directly or through an update.
    pub fn fills_content(&self) -> bool {
        match self.operation_type {
            OperationType::UpdateNodeContent => true,
            OperationType::UpdateNode => self.changes.contains_key("content"),
            _ => false,
        }
    }

    /// Key under which duplicate operations collapse, or `None` when the
    /// operation has no pre-existing, resolved target entity.
    pub fn dedup_key(&self) -> Option<(OperationClass, EntityRef)> {
        let ty = self.operation_type;
        if ty.is_creation() {
            return None;
        }
        let entity = if let Some(item_type) = ty.removed_item_type() {
            EntityRef {
                entity_type: item_type,
                id: self.target.item_id?,
            }
        } else {
            match ty.target_kind() {
                TargetKind::Tree => EntityRef {
                    entity_type: EntityType::Tree,
                    id: Uuid::nil(),
                },
                TargetKind::Block => EntityRef {
                    entity_type: EntityType::Block,
                    id: self.target.block_id?.as_uuid(),
                },
                TargetKind::Node => EntityRef {
                    entity_type: EntityType::Node,
                    id: self.target.node_id?.as_uuid(),
                },
            }
        };
        Some((ty.class(), entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names_round_trip() {
        for ty in OperationType::ALL {
            assert_eq!(OperationType::from_function_name(ty.function_name()), Some(ty));
        }
        assert_eq!(OperationType::from_function_name("find_node"), None);
    }

    #[test]
    fn test_addressability_requires_id_or_identifier() {
        let op = Operation::new(OperationType::UpdateNode, OperationTarget::default());
        assert!(!op.is_addressable());

        let op = Operation::new(
            OperationType::UpdateNode,
            OperationTarget {
                node_identifier: Some("first node".to_string()),
                ..Default::default()
            },
        );
        assert!(op.is_addressable());
        assert!(!op.is_resolved());

        let op = Operation::new(OperationType::CreateBlock, OperationTarget::default());
        assert!(op.is_addressable());
    }

    #[test]
    fn test_blank_identifier_is_not_a_reference() {
        let target = OperationTarget {
            node_identifier: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!target.has_reference(TargetKind::Node));
    }

    #[test]
    fn test_dedup_key_skips_creations_and_unresolved() {
        let node = NodeId::now_v7();
        let add = Operation::new(OperationType::AddLink, OperationTarget::node(node));
        assert!(add.dedup_key().is_none());

        let unresolved = Operation::new(
            OperationType::DeleteNode,
            OperationTarget {
                node_identifier: Some("Step A".to_string()),
                ..Default::default()
            },
        );
        assert!(unresolved.dedup_key().is_none());

        let update = Operation::new(OperationType::UpdateNode, OperationTarget::node(node));
        let delete = Operation::new(OperationType::DeleteNode, OperationTarget::node(node));
        assert_eq!(update.dedup_key(), delete.dedup_key());

        let content = Operation::new(OperationType::UpdateNodeContent, OperationTarget::node(node));
        assert_ne!(update.dedup_key(), content.dedup_key());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let op = Operation::new(OperationType::CreateBlock, OperationTarget::default())
            .with_confidence(1.7);
        assert_eq!(op.confidence, 1.0);
        let op = op.with_confidence(f32::NAN);
        assert_eq!(op.confidence, 0.0);
    }

    #[test]
    fn test_fill_and_rename_predicates() {
        let node = NodeId::now_v7();
        let rename = Operation::new(OperationType::UpdateNode, OperationTarget::node(node))
            .with_change("name", "Alpha");
        assert!(rename.renames_node());
        assert!(!rename.fills_content());

        let fill = Operation::new(OperationType::UpdateNode, OperationTarget::node(node))
            .with_change("content", "text");
        assert!(fill.fills_content());
    }
}
