//! Bulk-rename verification and repair.

use super::{run_repairs, sort_by_tree_order, RepairContext, RepairStrategy};
use crate::calls::translate_calls;
use crate::dedup::dedup_last_wins;
use crate::generator::complete_within;
use crate::prompt::{build_messages, rename_repair_instruction};
use arbor_core::{
    BulkClass, CoverageReport, FieldChanges, NodeId, NodeView, Operation, OperationTarget,
    OperationType, PlanMode,
};
use arbor_llm::catalog::operation_function;
use arbor_llm::{CompletionRequest, ToolChoice};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Rename operation pairing `node` with `name`, recording the old name.
pub(crate) fn rename_operation(node: &NodeView, name: &str, reasoning: &str) -> Operation {
    let mut op = Operation::new(OperationType::UpdateNode, OperationTarget::node(node.id()))
        .with_change("name", name)
        .with_reasoning(reasoning);
    let mut before = FieldChanges::new();
    before.insert("name".to_string(), Value::from(node.name()));
    op.before = Some(before);
    op
}

/// Pairs still-missing nodes, in tree order, with names extracted from the
/// conversation that no operation has used yet.
pub struct ExtractedNameRepair;

#[async_trait]
impl RepairStrategy for ExtractedNameRepair {
    fn name(&self) -> &'static str {
        "extracted_names"
    }

    async fn attempt(&self, missing: &[NodeId], ctx: &RepairContext<'_>) -> Vec<Operation> {
        missing
            .iter()
            .filter_map(|id| ctx.snapshot.node(*id))
            .zip(ctx.unused_names.iter())
            .map(|(node, name)| rename_operation(node, name, "Paired with a name from the conversation"))
            .collect()
    }
}

/// One narrowly scoped model call listing only the missing nodes.
pub struct TargetedRequeryRepair;

#[async_trait]
impl RepairStrategy for TargetedRequeryRepair {
    fn name(&self) -> &'static str {
        "targeted_requery"
    }

    async fn attempt(&self, missing: &[NodeId], ctx: &RepairContext<'_>) -> Vec<Operation> {
        let nodes: Vec<&NodeView> = missing.iter().filter_map(|id| ctx.snapshot.node(*id)).collect();
        if nodes.is_empty() {
            return Vec::new();
        }
        let instruction = rename_repair_instruction(ctx.snapshot, &nodes);
        let request = CompletionRequest {
            messages: build_messages(
                PlanMode::Mutate,
                ctx.snapshot,
                &[],
                0,
                ctx.query,
                Some(&instruction),
            ),
            functions: vec![operation_function(OperationType::UpdateNode)],
            tool_choice: ToolChoice::Required,
            temperature: ctx.config.repair_temperature,
            max_tokens: ctx.config.token_budget(nodes.len()),
        };

        let budget = ctx.config.repair_timeout(nodes.len());
        match complete_within(ctx.model, &request, budget).await {
            Ok(response) => {
                translate_calls(&response.function_calls, ctx.snapshot, ctx.resolver, PlanMode::Mutate)
                    .operations
                    .into_iter()
                    .filter(Operation::renames_node)
                    .collect()
            }
            Err(e) => {
                warn!(missing = nodes.len(), error = %e, "Rename repair call failed");
                Vec::new()
            }
        }
    }
}

/// Ensure every node in the tree carries a rename, repairing gaps first
/// from unused extracted names and then with one targeted model call.
///
/// Returns renames in tree order followed by any other (deduplicated)
/// operations, plus the coverage report.
pub async fn verify_rename(
    ops: Vec<Operation>,
    extracted_names: &[String],
    ctx: &RepairContext<'_>,
) -> (Vec<Operation>, CoverageReport) {
    let expected: Vec<NodeId> = ctx.snapshot.nodes_in_order().map(|n| n.id()).collect();
    let all: HashSet<NodeId> = expected.iter().copied().collect();

    let mut renames: HashMap<NodeId, Operation> = HashMap::new();
    let mut others = Vec::new();
    for op in ops {
        match op.target_node().filter(|n| op.renames_node() && all.contains(n)) {
            Some(node) => {
                renames.insert(node, op);
            }
            None => others.push(op),
        }
    }

    // Names may repeat, so each rename consumes one occurrence.
    let mut used: Vec<&str> = renames
        .values()
        .filter_map(|op| op.change_str("name"))
        .map(str::trim)
        .collect();
    let unused: Vec<String> = extracted_names
        .iter()
        .filter(|name| match used.iter().position(|u| *u == name.trim()) {
            Some(i) => {
                used.swap_remove(i);
                false
            }
            None => true,
        })
        .cloned()
        .collect();

    let mut covered: HashSet<NodeId> = renames.keys().copied().collect();
    let mut operations: Vec<Operation> = renames.into_values().collect();
    let repair_ctx = RepairContext {
        unused_names: &unused,
        ..*ctx
    };
    operations.extend(
        run_repairs(
            &[&ExtractedNameRepair, &TargetedRequeryRepair],
            &expected,
            &mut covered,
            &repair_ctx,
        )
        .await,
    );
    sort_by_tree_order(&mut operations, ctx.snapshot);
    operations.extend(dedup_last_wins(others));

    let report = CoverageReport::compute(BulkClass::BulkRename, &expected, &covered);
    if !report.is_complete() {
        warn!(
            tree_id = %ctx.snapshot.tree_id(),
            missing = report.missing.len(),
            covered = report.covered,
            "Bulk rename left nodes uncovered after repair"
        );
    }
    (operations, report)
}
