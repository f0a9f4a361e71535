//! Empty-content fill verification.

use super::{run_repairs, sort_by_tree_order, RepairContext, RepairStrategy};
use crate::binding::capture_before;
use arbor_core::{BulkClass, CoverageReport, NodeId, Operation, OperationTarget, OperationType};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const SYNTHESIZED_CONFIDENCE: f32 = 0.6;

/// First sentence of `text`, or its first `max_chars` characters if the
/// sentence is longer or there is none.
pub fn synthesize_summary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let mut end = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |(_, next)| next.is_whitespace()) {
            end = Some(i + c.len_utf8());
            break;
        }
    }
    let sentence = end.map(|e| &text[..e]).unwrap_or(text);
    if sentence.chars().count() <= max_chars {
        sentence.to_string()
    } else {
        sentence.chars().take(max_chars).collect::<String>().trim_end().to_string()
    }
}

/// Builds a fill straight from a node's description (or its name when it
/// has none). Needs no model call.
pub struct DescriptionSynthesis;

#[async_trait]
impl RepairStrategy for DescriptionSynthesis {
    fn name(&self) -> &'static str {
        "description_synthesis"
    }

    async fn attempt(&self, missing: &[NodeId], ctx: &RepairContext<'_>) -> Vec<Operation> {
        missing
            .iter()
            .filter_map(|id| ctx.snapshot.node(*id))
            .map(|node| {
                let source = node
                    .node
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| node.name());
                let summary = synthesize_summary(source, ctx.config.summary_max_chars);
                let mut op = Operation::new(
                    OperationType::UpdateNodeContent,
                    OperationTarget::node(node.id()),
                )
                .with_change("content", source)
                .with_change("summary", summary)
                .with_confidence(SYNTHESIZED_CONFIDENCE)
                .with_reasoning("Filled from the node's existing description");
                op.before = capture_before(ctx.snapshot, &op);
                op
            })
            .collect()
    }
}

/// Reduce `ops` to exactly one fill per empty-content node, in tree order.
///
/// Fills aimed at nodes that already have content, unresolved fills, and
/// operations that are not fills at all are dropped. Gaps are closed by
/// [`DescriptionSynthesis`].
pub async fn verify_empty_content(
    ops: Vec<Operation>,
    ctx: &RepairContext<'_>,
) -> (Vec<Operation>, CoverageReport) {
    let expected: Vec<NodeId> = ctx
        .snapshot
        .empty_content_nodes()
        .iter()
        .map(|n| n.id())
        .collect();
    let empty: HashSet<NodeId> = expected.iter().copied().collect();

    let mut fills: HashMap<NodeId, Operation> = HashMap::new();
    for op in ops {
        if !op.fills_content() {
            debug!(operation_id = %op.operation_id, kind = ?op.operation_type, "Dropping non-fill operation from empty-content plan");
            continue;
        }
        match op.target_node() {
            Some(node) if empty.contains(&node) => {
                fills.insert(node, op);
            }
            Some(node) => {
                debug!(node_id = %node, "Filtered fill for node that already has content");
            }
            None => {
                debug!(operation_id = %op.operation_id, "Filtered unresolved fill");
            }
        }
    }

    let mut covered: HashSet<NodeId> = fills.keys().copied().collect();
    let mut operations: Vec<Operation> = fills.into_values().collect();
    operations.extend(run_repairs(&[&DescriptionSynthesis], &expected, &mut covered, ctx).await);
    sort_by_tree_order(&mut operations, ctx.snapshot);

    let report = CoverageReport::compute(BulkClass::EmptyContentFill, &expected, &covered);
    if !report.is_complete() {
        warn!(
            tree_id = %ctx.snapshot.tree_id(),
            missing = report.missing.len(),
            covered = report.covered,
            "Empty-content fill left nodes uncovered"
        );
    }
    (operations, report)
}
