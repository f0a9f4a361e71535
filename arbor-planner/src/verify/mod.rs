//! Bulk-completeness verification.
//!
//! A bulk class names a set of nodes every one of which must be touched.
//! Each verifier keeps the generated operations that genuinely cover that
//! set, then runs an ordered list of [`RepairStrategy`] values over what is
//! still missing. Whatever remains uncovered is reported, never hidden.

mod empty_content;
mod rename;

pub use empty_content::{synthesize_summary, verify_empty_content, DescriptionSynthesis};
pub use rename::{verify_rename, ExtractedNameRepair, TargetedRequeryRepair};
pub(crate) use rename::rename_operation;

use crate::resolver::EntityResolver;
use arbor_core::{NodeId, Operation, PlannerConfig, TreeSnapshot};
use arbor_llm::LanguageModel;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

/// Everything a repair strategy may consult.
pub struct RepairContext<'a> {
    pub query: &'a str,
    pub snapshot: &'a TreeSnapshot,
    pub config: &'a PlannerConfig,
    pub resolver: &'a EntityResolver,
    pub model: &'a dyn LanguageModel,
    /// Candidate names not yet used by any operation, in extraction order.
    pub unused_names: &'a [String],
}

/// One way of producing operations for nodes a plan failed to cover.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Propose operations for `missing` (tree order). Proposals outside
    /// `missing` are ignored by the caller.
    async fn attempt(&self, missing: &[NodeId], ctx: &RepairContext<'_>) -> Vec<Operation>;
}

/// Run `strategies` in order until `covered` includes every `expected`
/// node or the strategies are exhausted. Returns the accepted operations.
pub async fn run_repairs(
    strategies: &[&dyn RepairStrategy],
    expected: &[NodeId],
    covered: &mut HashSet<NodeId>,
    ctx: &RepairContext<'_>,
) -> Vec<Operation> {
    let mut accepted = Vec::new();
    for strategy in strategies {
        let missing: Vec<NodeId> = expected
            .iter()
            .copied()
            .filter(|id| !covered.contains(id))
            .collect();
        if missing.is_empty() {
            break;
        }
        let wanted: HashSet<NodeId> = missing.iter().copied().collect();
        let proposed = strategy.attempt(&missing, ctx).await;
        let produced = proposed.len();
        let mut gained = 0usize;
        for op in proposed {
            let Some(node) = op.target_node().filter(|n| wanted.contains(n)) else {
                continue;
            };
            if covered.insert(node) {
                gained += 1;
                accepted.push(op);
            }
        }
        info!(
            strategy = strategy.name(),
            missing = missing.len(),
            produced,
            covered = gained,
            "Repair strategy finished"
        );
    }
    accepted
}

/// Sort operations by the tree order of their target node; operations
/// without a node target keep their relative order at the end.
pub(crate) fn sort_by_tree_order(ops: &mut [Operation], snapshot: &TreeSnapshot) {
    ops.sort_by_key(|op| {
        op.target_node()
            .and_then(|n| snapshot.tree_order_rank(n))
            .unwrap_or(usize::MAX)
    });
}
