//! Versioned catalog of functions offered to the model
//!
//! One function per [`OperationType`] plus two read-only search functions.
//! Argument names here are the contract the planner parses against.

use crate::FunctionSpec;
use arbor_core::{OperationType, PlanMode};
use serde_json::{json, Map, Value};

/// Bumped whenever a function name or argument changes meaning.
pub const CATALOG_VERSION: &str = "2024.11.2";

pub const FIND_NODE: &str = "find_node";
pub const FIND_BLOCK: &str = "find_block";

/// Read-only lookup functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFunction {
    FindNode,
    FindBlock,
}

impl SearchFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            FIND_NODE => Some(Self::FindNode),
            FIND_BLOCK => Some(Self::FindBlock),
            _ => None,
        }
    }
}

fn string(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn node_target(props: &mut Map<String, Value>) {
    props.insert(
        "node_id".into(),
        string("UUID of the target node, when known from the tree context"),
    );
    props.insert(
        "node_identifier".into(),
        string("Name or description of the target node, e.g. \"first node in Protocol block\""),
    );
    props.insert(
        "block_identifier".into(),
        string("Name of the block containing the node, narrows the node search"),
    );
}

fn block_target(props: &mut Map<String, Value>) {
    props.insert("block_id".into(), string("UUID of the target block"));
    props.insert(
        "block_identifier".into(),
        string("Name or position of the target block"),
    );
}

fn spec(name: &str, description: &str, mut props: Map<String, Value>, required: &[&str]) -> FunctionSpec {
    props.insert(
        "reasoning".into(),
        string("One sentence explaining why this change is needed"),
    );
    props.insert(
        "confidence".into(),
        json!({"type": "number", "minimum": 0, "maximum": 1}),
    );
    FunctionSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": props,
            "required": required,
        }),
    }
}

/// Function definition for one operation type.
pub fn operation_function(ty: OperationType) -> FunctionSpec {
    let mut p = Map::new();
    let name = ty.function_name();
    match ty {
        OperationType::CreateNode => {
            block_target(&mut p);
            p.insert("name".into(), string("Name of the new node"));
            p.insert("description".into(), string("Short description"));
            p.insert("node_type".into(), string("Type tag, e.g. protocol, analysis"));
            p.insert("content".into(), string("Initial content"));
            p.insert("position".into(), json!({"type": "integer", "minimum": 0}));
            spec(name, "Create a new node inside a block", p, &["name"])
        }
        OperationType::UpdateNode => {
            node_target(&mut p);
            p.insert("name".into(), string("New node name"));
            p.insert("description".into(), string("New description"));
            p.insert("node_type".into(), string("New type tag"));
            p.insert(
                "status".into(),
                json!({"type": "string", "enum": ["draft", "in_progress", "complete", "archived"]}),
            );
            p.insert("content".into(), string("Replacement content"));
            spec(name, "Update fields of an existing node, including renaming it", p, &[])
        }
        OperationType::DeleteNode => {
            node_target(&mut p);
            spec(name, "Delete a node and everything attached to it", p, &[])
        }
        OperationType::MoveNode => {
            node_target(&mut p);
            p.insert("target_block_id".into(), string("UUID of the destination block"));
            p.insert(
                "target_block_identifier".into(),
                string("Name of the destination block"),
            );
            p.insert("position".into(), json!({"type": "integer", "minimum": 0}));
            spec(name, "Move a node to another block or position", p, &[])
        }
        OperationType::CreateBlock => {
            p.insert("name".into(), string("Name of the new block"));
            p.insert("description".into(), string("Short description"));
            p.insert("block_type".into(), string("Type tag"));
            p.insert("position".into(), json!({"type": "integer", "minimum": 0}));
            spec(name, "Create a new block in the tree", p, &["name"])
        }
        OperationType::UpdateBlock => {
            block_target(&mut p);
            p.insert("name".into(), string("New block name"));
            p.insert("description".into(), string("New description"));
            p.insert("block_type".into(), string("New type tag"));
            spec(name, "Update fields of an existing block", p, &[])
        }
        OperationType::DeleteBlock => {
            block_target(&mut p);
            spec(name, "Delete a block and all of its nodes", p, &[])
        }
        OperationType::ReorderBlocks => {
            p.insert(
                "block_order".into(),
                json!({
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Block names or ids in the desired order",
                }),
            );
            spec(name, "Reorder the blocks of the tree", p, &["block_order"])
        }
        OperationType::UpdateNodeContent => {
            node_target(&mut p);
            p.insert("content".into(), string("Full new content for the node"));
            p.insert("summary".into(), string("One-line summary of the content"));
            spec(name, "Replace the content of a node", p, &["content"])
        }
        OperationType::AddLink => {
            node_target(&mut p);
            p.insert("name".into(), string("Link title"));
            p.insert("url".into(), string("Link URL"));
            p.insert("description".into(), string("What the link points to"));
            p.insert("link_type".into(), string("Kind of link, e.g. documentation"));
            spec(name, "Attach a link to a node", p, &["url"])
        }
        OperationType::RemoveLink => {
            node_target(&mut p);
            p.insert("link_id".into(), string("UUID of the link"));
            p.insert("link_name".into(), string("Title or URL of the link"));
            spec(name, "Remove a link from a node", p, &[])
        }
        OperationType::AddAttachment => {
            node_target(&mut p);
            p.insert("name".into(), string("Attachment name"));
            p.insert("file_url".into(), string("File reference"));
            p.insert("file_type".into(), string("MIME type or extension"));
            p.insert("description".into(), string("What the file contains"));
            spec(name, "Attach a file reference to a node", p, &["file_url"])
        }
        OperationType::RemoveAttachment => {
            node_target(&mut p);
            p.insert("attachment_id".into(), string("UUID of the attachment"));
            p.insert("attachment_name".into(), string("Name of the attachment"));
            spec(name, "Remove an attachment from a node", p, &[])
        }
        OperationType::AddDependency => {
            node_target(&mut p);
            p.insert("to_node_id".into(), string("UUID of the node depended upon"));
            p.insert(
                "to_node_identifier".into(),
                string("Name of the node depended upon"),
            );
            p.insert(
                "dependency_type".into(),
                json!({"type": "string", "enum": ["requires", "follows", "uses", "produces"]}),
            );
            p.insert("evidence_text".into(), string("Text supporting the dependency"));
            spec(name, "Add a dependency from one node to another", p, &[])
        }
        OperationType::RemoveDependency => {
            node_target(&mut p);
            p.insert("dependency_id".into(), string("UUID of the dependency"));
            p.insert("to_node_id".into(), string("UUID of the node depended upon"));
            p.insert(
                "to_node_identifier".into(),
                string("Name of the node depended upon"),
            );
            spec(name, "Remove a dependency between two nodes", p, &[])
        }
    }
}

pub fn search_functions() -> Vec<FunctionSpec> {
    let mut node = Map::new();
    node.insert("query".into(), string("Text to search node names for"));
    node.insert("block_identifier".into(), string("Restrict the search to this block"));
    let mut block = Map::new();
    block.insert("query".into(), string("Text to search block names for"));
    vec![
        spec(FIND_NODE, "Look up nodes by name or position", node, &["query"]),
        spec(FIND_BLOCK, "Look up blocks by name or position", block, &["query"]),
    ]
}

/// Functions offered in `mode`. Read-only mode offers searches only.
pub fn catalog(mode: PlanMode) -> Vec<FunctionSpec> {
    let mut functions = search_functions();
    if mode == PlanMode::Mutate {
        functions.extend(OperationType::ALL.into_iter().map(operation_function));
    }
    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_covers_every_operation_type() {
        let names: HashSet<String> = catalog(PlanMode::Mutate).into_iter().map(|f| f.name).collect();
        for ty in OperationType::ALL {
            assert!(names.contains(ty.function_name()), "missing {}", ty.function_name());
        }
        assert!(names.contains(FIND_NODE));
        assert!(names.contains(FIND_BLOCK));
        assert_eq!(names.len(), OperationType::ALL.len() + 2);
    }

    #[test]
    fn test_read_only_catalog_has_no_mutations() {
        let functions = catalog(PlanMode::ReadOnly);
        assert!(functions
            .iter()
            .all(|f| SearchFunction::from_name(&f.name).is_some()));
    }

    #[test]
    fn test_every_schema_is_an_object_with_reasoning() {
        for f in catalog(PlanMode::Mutate) {
            assert_eq!(f.parameters["type"], "object");
            assert!(f.parameters["properties"].get("reasoning").is_some(), "{}", f.name);
        }
    }
}
