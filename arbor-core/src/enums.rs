//! Enum types for ARBOR entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error parsing an enum from its database string representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator, one per store collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Tree,
    Block,
    Node,
    NodeContent,
    NodeLink,
    NodeAttachment,
    NodeDependency,
}

impl EntityType {
    /// Name of the backing collection.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Tree => "trees",
            Self::Block => "tree_blocks",
            Self::Node => "tree_nodes",
            Self::NodeContent => "node_content",
            Self::NodeLink => "node_links",
            Self::NodeAttachment => "node_attachments",
            Self::NodeDependency => "node_dependencies",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// NODE STATUS
// ============================================================================

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Draft,
    InProgress,
    Complete,
    Archived,
}

impl NodeStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Archived => "archived",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "draft" => Ok(Self::Draft),
            "in_progress" => Ok(Self::InProgress),
            "complete" | "completed" | "done" => Ok(Self::Complete),
            "archived" => Ok(Self::Archived),
            _ => Err(ParseEnumError {
                kind: "node status",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for NodeStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// DEPENDENCY TYPE
// ============================================================================

/// Type of an outgoing dependency from one node to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Requires,
    Follows,
    Uses,
    Produces,
}

impl DependencyType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::Follows => "follows",
            Self::Uses => "uses",
            Self::Produces => "produces",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requires" | "depends_on" => Ok(Self::Requires),
            "follows" => Ok(Self::Follows),
            "uses" | "uses_output" => Ok(Self::Uses),
            "produces" => Ok(Self::Produces),
            _ => Err(ParseEnumError {
                kind: "dependency type",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for DependencyType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_db_round_trip() {
        for status in [
            NodeStatus::Draft,
            NodeStatus::InProgress,
            NodeStatus::Complete,
            NodeStatus::Archived,
        ] {
            assert_eq!(NodeStatus::from_db_str(status.as_db_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_node_status_accepts_loose_spelling() {
        assert_eq!(NodeStatus::from_db_str("In Progress").unwrap(), NodeStatus::InProgress);
        assert_eq!(NodeStatus::from_db_str("done").unwrap(), NodeStatus::Complete);
        assert!(NodeStatus::from_db_str("paused").is_err());
    }

    #[test]
    fn test_dependency_type_parse() {
        assert_eq!(DependencyType::from_db_str("Follows").unwrap(), DependencyType::Follows);
        let err = DependencyType::from_db_str("blocks").unwrap_err();
        assert!(err.to_string().contains("dependency type"));
    }

    #[test]
    fn test_entity_type_collection_names() {
        assert_eq!(EntityType::Node.collection(), "tree_nodes");
        assert_eq!(EntityType::NodeDependency.collection(), "node_dependencies");
    }
}
