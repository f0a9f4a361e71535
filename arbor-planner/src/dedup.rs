//! Last-wins deduplication by (operation class, target entity).

use arbor_core::Operation;
use std::collections::HashSet;

/// Collapse operations that share a dedup key to the last one generated,
/// keeping the survivors in their original relative order. Operations
/// without a key (creations, unresolved targets) pass through unchanged.
pub fn dedup_last_wins(operations: Vec<Operation>) -> Vec<Operation> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Operation> = operations
        .into_iter()
        .rev()
        .filter(|op| match op.dedup_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{EntityIdType, NodeId, OperationTarget, OperationType};

    fn update(node: NodeId, name: &str) -> Operation {
        Operation::new(OperationType::UpdateNode, OperationTarget::node(node)).with_change("name", name)
    }

    #[test]
    fn test_later_operation_wins() {
        let (a, b) = (NodeId::now_v7(), NodeId::now_v7());
        let ops = vec![update(a, "first"), update(b, "other"), update(a, "second")];
        let out = dedup_last_wins(ops);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].change_str("name"), Some("other"));
        assert_eq!(out[1].change_str("name"), Some("second"));
    }

    #[test]
    fn test_different_classes_on_same_node_survive() {
        let a = NodeId::now_v7();
        let content = Operation::new(OperationType::UpdateNodeContent, OperationTarget::node(a))
            .with_change("content", "x");
        let out = dedup_last_wins(vec![update(a, "n"), content]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_unresolved_and_creations_pass_through() {
        let unresolved = Operation::new(
            OperationType::UpdateNode,
            OperationTarget {
                node_identifier: Some("Step A".to_string()),
                ..Default::default()
            },
        );
        let create = Operation::new(OperationType::CreateBlock, OperationTarget::default());
        let out = dedup_last_wins(vec![
            unresolved.clone(),
            unresolved,
            create.clone(),
            create,
        ]);
        assert_eq!(out.len(), 4);
    }
}
