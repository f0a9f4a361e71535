//! Target binding: fill resolved ids into an operation from a snapshot.
//!
//! Used twice: once at generation time against the request snapshot, and
//! again by the executor against the freshest snapshot for anything still
//! carried as a natural-language identifier.

use crate::resolver::EntityResolver;
use arbor_core::{
    BlockView, EntityIdType, FieldChanges, NodeId, NodeView, Operation, OperationType,
    TargetKind, TreeSnapshot,
};
use serde_json::Value;
use uuid::Uuid;

/// Resolution confidence reported when nothing needed resolving.
const BOUND: f32 = 1.0;

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn same_label(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Resolve every unbound reference on `op` and return the lowest
/// confidence among the resolutions performed, or `None` when a required
/// reference could not be resolved.
pub fn bind_target(
    snapshot: &TreeSnapshot,
    resolver: &EntityResolver,
    op: &mut Operation,
) -> Option<f32> {
    let mut confidence = BOUND;
    let mut complete = true;

    if op.target.block_id.is_none() {
        if let Some(identifier) = non_blank(op.target.block_identifier.as_deref()) {
            match resolver.best_block(snapshot, identifier) {
                Some(m) => {
                    op.target.block_id = Some(m.block_id);
                    confidence = confidence.min(m.confidence);
                }
                None => complete = false,
            }
        }
    }

    if op.target.node_id.is_none() {
        if let Some(identifier) = non_blank(op.target.node_identifier.as_deref()) {
            match resolver.best_node(snapshot, identifier, op.target.block_id) {
                Some(m) => {
                    op.target.node_id = Some(m.node_id);
                    confidence = confidence.min(m.confidence);
                }
                None => complete = false,
            }
        }
    }

    match op.operation_type {
        OperationType::MoveNode => {
            complete &= bind_change(
                op,
                "target_block_id",
                "target_block_identifier",
                |text| {
                    resolver
                        .best_block(snapshot, text)
                        .map(|m| (m.block_id.as_uuid(), m.confidence))
                },
                &mut confidence,
            );
        }
        OperationType::AddDependency => {
            complete &= bind_change(
                op,
                "to_node_id",
                "to_node_identifier",
                |text| {
                    resolver
                        .best_node(snapshot, text, None)
                        .map(|m| (m.node_id.as_uuid(), m.confidence))
                },
                &mut confidence,
            );
        }
        ty if ty.removed_item_type().is_some() => {
            if op.target.item_id.is_none() {
                op.target.item_id = find_removed_item(snapshot, resolver, op);
            }
            // The permission check covers the target node only, so the item
            // must hang off that node.
            let item = op.target.item_id;
            complete &= item.is_some_and(|item| node_owns_item(snapshot, op, item));
        }
        _ => {}
    }

    let kind = op.operation_type.target_kind();
    (complete && op.target.is_resolved(kind)).then_some(confidence)
}

/// Resolve `identifier_key` (or a non-uuid value under `id_key`) into a
/// uuid stored under `id_key`.
fn bind_change(
    op: &mut Operation,
    id_key: &str,
    identifier_key: &str,
    resolve: impl Fn(&str) -> Option<(Uuid, f32)>,
    confidence: &mut f32,
) -> bool {
    if op.change_str(id_key).and_then(|s| Uuid::parse_str(s.trim()).ok()).is_some() {
        return true;
    }
    let Some(text) = non_blank(op.change_str(identifier_key))
        .or_else(|| non_blank(op.change_str(id_key)))
        .map(str::to_string)
    else {
        return false;
    };
    match resolve(&text) {
        Some((id, c)) => {
            op.changes.insert(id_key.to_string(), Value::String(id.to_string()));
            *confidence = confidence.min(c);
            true
        }
        None => false,
    }
}

fn find_removed_item(
    snapshot: &TreeSnapshot,
    resolver: &EntityResolver,
    op: &Operation,
) -> Option<Uuid> {
    let node = snapshot.node(op.target.node_id?)?;
    let parse = |key: &str| op.change_str(key).and_then(|s| Uuid::parse_str(s.trim()).ok());

    match op.operation_type {
        OperationType::RemoveLink => parse("link_id").or_else(|| {
            let label = non_blank(op.change_str("link_name").or(op.change_str("url")))?;
            node.links
                .iter()
                .find(|l| same_label(&l.name, label) || same_label(&l.url, label))
                .map(|l| l.link_id.as_uuid())
        }),
        OperationType::RemoveAttachment => parse("attachment_id").or_else(|| {
            let label = non_blank(op.change_str("attachment_name").or(op.change_str("file_url")))?;
            node.attachments
                .iter()
                .find(|a| same_label(&a.name, label) || same_label(&a.file_url, label))
                .map(|a| a.attachment_id.as_uuid())
        }),
        OperationType::RemoveDependency => parse("dependency_id").or_else(|| {
            let to: NodeId = match parse("to_node_id") {
                Some(id) => NodeId::new(id),
                None => {
                    let identifier = non_blank(op.change_str("to_node_identifier"))?;
                    resolver.best_node(snapshot, identifier, None)?.node_id
                }
            };
            node.dependencies
                .iter()
                .find(|d| d.to_node_id == to)
                .map(|d| d.dependency_id.as_uuid())
        }),
        _ => None,
    }
}

fn node_owns_item(snapshot: &TreeSnapshot, op: &Operation, item: Uuid) -> bool {
    let Some(node) = op.target.node_id.and_then(|id| snapshot.node(id)) else {
        return false;
    };
    match op.operation_type {
        OperationType::RemoveLink => node.links.iter().any(|l| l.link_id.as_uuid() == item),
        OperationType::RemoveAttachment => node
            .attachments
            .iter()
            .any(|a| a.attachment_id.as_uuid() == item),
        OperationType::RemoveDependency => node
            .dependencies
            .iter()
            .any(|d| d.dependency_id.as_uuid() == item),
        _ => false,
    }
}

fn node_field(node: &NodeView, field: &str) -> Option<Value> {
    let n = &node.node;
    Some(match field {
        "name" => Value::from(n.name.clone()),
        "description" => Value::from(n.description.clone()?),
        "node_type" => Value::from(n.node_type.clone()),
        "status" => Value::from(n.status.as_db_str()),
        "position" => Value::from(n.position),
        "content" => Value::from(node.content.clone().unwrap_or_default()),
        "target_block_id" => Value::from(n.block_id.to_string()),
        _ => return None,
    })
}

fn block_field(block: &BlockView, field: &str) -> Option<Value> {
    let b = &block.block;
    Some(match field {
        "name" => Value::from(b.name.clone()),
        "description" => Value::from(b.description.clone()?),
        "block_type" => Value::from(b.block_type.clone()),
        "position" => Value::from(b.position),
        _ => return None,
    })
}

/// Current values of the fields `op` is about to change, for preview.
pub fn capture_before(snapshot: &TreeSnapshot, op: &Operation) -> Option<FieldChanges> {
    let mut before = FieldChanges::new();
    match op.operation_type.target_kind() {
        TargetKind::Node => {
            let node = snapshot.node(op.target.node_id?)?;
            match op.operation_type {
                OperationType::DeleteNode => {
                    before.insert("name".to_string(), Value::from(node.name()));
                }
                OperationType::UpdateNodeContent => {
                    if let Some(v) = node_field(node, "content") {
                        before.insert("content".to_string(), v);
                    }
                }
                _ => {
                    for field in op.changes.keys() {
                        if let Some(v) = node_field(node, field) {
                            before.insert(field.clone(), v);
                        }
                    }
                }
            }
        }
        TargetKind::Block => {
            let block = snapshot.block(op.target.block_id?)?;
            match op.operation_type {
                OperationType::UpdateBlock => {
                    for field in op.changes.keys() {
                        if let Some(v) = block_field(block, field) {
                            before.insert(field.clone(), v);
                        }
                    }
                }
                OperationType::DeleteBlock => {
                    before.insert("name".to_string(), Value::from(block.name()));
                    before.insert("node_count".to_string(), Value::from(block.nodes.len()));
                }
                _ => {}
            }
        }
        TargetKind::Tree => {
            if op.operation_type == OperationType::ReorderBlocks {
                let order: Vec<Value> = snapshot
                    .blocks()
                    .iter()
                    .map(|b| Value::from(b.name()))
                    .collect();
                before.insert("block_order".to_string(), Value::Array(order));
            }
        }
    }
    (!before.is_empty()).then_some(before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{OperationTarget, PlannerConfig};
    use arbor_test_utils::{block_id, node_id, protocol_results_tree, TreeBuilder};
    use serde_json::json;

    fn resolver() -> EntityResolver {
        EntityResolver::new(&PlannerConfig::default())
    }

    fn identified(ty: OperationType, node: &str) -> Operation {
        Operation::new(
            ty,
            OperationTarget {
                node_identifier: Some(node.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_block_scope_resolves_first() {
        let snapshot = TreeBuilder::new("t")
            .block("Protocol")
            .node("Overview")
            .block("Results")
            .node("Overview")
            .snapshot();
        let mut op = Operation::new(
            OperationType::UpdateNode,
            OperationTarget {
                node_identifier: Some("Overview".to_string()),
                block_identifier: Some("Results".to_string()),
                ..Default::default()
            },
        );
        let confidence = bind_target(&snapshot, &resolver(), &mut op).unwrap();
        let results = block_id(&snapshot, "Results");
        assert_eq!(op.target.block_id, Some(results));
        let bound = snapshot.node(op.target.node_id.unwrap()).unwrap();
        assert_eq!(bound.node.block_id, results);
        assert!(confidence >= 0.9);
    }

    #[test]
    fn test_unresolvable_identifier_keeps_reference() {
        let snapshot = protocol_results_tree().snapshot();
        let mut op = identified(OperationType::DeleteNode, "Nonexistent widget");
        assert!(bind_target(&snapshot, &resolver(), &mut op).is_none());
        assert!(op.is_addressable());
        assert!(!op.is_resolved());
    }

    #[test]
    fn test_remove_link_by_name() {
        let snapshot = TreeBuilder::new("t")
            .block("B")
            .node("Overview")
            .link("Docs", "https://example.org/docs")
            .snapshot();
        let mut op = identified(OperationType::RemoveLink, "Overview").with_change("link_name", "docs");
        bind_target(&snapshot, &resolver(), &mut op).unwrap();
        let link = &snapshot.node(node_id(&snapshot, "Overview")).unwrap().links[0];
        assert_eq!(op.target.item_id, Some(link.link_id.as_uuid()));
    }

    #[test]
    fn test_removal_of_another_nodes_link_does_not_bind() {
        let snapshot = TreeBuilder::new("t")
            .block("B")
            .node("Open")
            .node("Guarded")
            .link("Docs", "https://example.org/docs")
            .snapshot();
        let foreign = snapshot.node(node_id(&snapshot, "Guarded")).unwrap().links[0].link_id;

        let mut by_change = identified(OperationType::RemoveLink, "Open")
            .with_change("link_id", foreign.to_string());
        assert!(bind_target(&snapshot, &resolver(), &mut by_change).is_none());

        let mut by_target = identified(OperationType::RemoveLink, "Open");
        by_target.target.item_id = Some(foreign.as_uuid());
        assert!(bind_target(&snapshot, &resolver(), &mut by_target).is_none());

        let mut own = identified(OperationType::RemoveLink, "Guarded")
            .with_change("link_id", foreign.to_string());
        assert!(bind_target(&snapshot, &resolver(), &mut own).is_some());
    }

    #[test]
    fn test_dependency_target_identifier_is_bound() {
        let snapshot = protocol_results_tree().snapshot();
        let mut op = identified(OperationType::AddDependency, "Step C")
            .with_change("to_node_identifier", "Step A");
        bind_target(&snapshot, &resolver(), &mut op).unwrap();
        let expected = node_id(&snapshot, "Step A").to_string();
        assert_eq!(op.change_str("to_node_id"), Some(expected.as_str()));
    }

    #[test]
    fn test_remove_dependency_by_target_name() {
        let snapshot = TreeBuilder::new("t")
            .block("B")
            .node("Mix")
            .node("Measure")
            .depends_on("Mix")
            .snapshot();
        let mut op =
            identified(OperationType::RemoveDependency, "Measure").with_change("to_node_identifier", "Mix");
        bind_target(&snapshot, &resolver(), &mut op).unwrap();
        let dep = &snapshot.node(node_id(&snapshot, "Measure")).unwrap().dependencies[0];
        assert_eq!(op.target.item_id, Some(dep.dependency_id.as_uuid()));
    }

    #[test]
    fn test_before_captures_changed_fields_only() {
        let snapshot = protocol_results_tree().snapshot();
        let op = Operation::new(
            OperationType::UpdateNode,
            OperationTarget::node(node_id(&snapshot, "Step B")),
        )
        .with_change("name", "Mixing")
        .with_change("unknown_field", 3);
        let before = capture_before(&snapshot, &op).unwrap();
        assert_eq!(before.get("name"), Some(&json!("Step B")));
        assert_eq!(before.len(), 1);

        let fill = Operation::new(
            OperationType::UpdateNodeContent,
            OperationTarget::node(node_id(&snapshot, "Step B")),
        );
        assert_eq!(capture_before(&snapshot, &fill).unwrap()["content"], json!("done"));
    }
}
