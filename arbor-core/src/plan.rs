//! Plans and bulk coverage

use crate::{NodeId, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether the model may propose mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    #[default]
    Mutate,
    ReadOnly,
}

/// Query categories that must cover every matching node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkClass {
    EmptyContentFill,
    BulkRename,
}

impl BulkClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::EmptyContentFill => "empty-content fill",
            Self::BulkRename => "bulk rename",
        }
    }
}

/// Expected versus covered nodes for a bulk class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub class: BulkClass,
    pub expected: usize,
    pub covered: usize,
    /// Uncovered nodes, in tree order.
    pub missing: Vec<NodeId>,
}

impl CoverageReport {
    /// Compare the `expected` node list against the nodes in `covered`.
    pub fn compute(class: BulkClass, expected: &[NodeId], covered: &HashSet<NodeId>) -> Self {
        let missing: Vec<NodeId> = expected
            .iter()
            .copied()
            .filter(|id| !covered.contains(id))
            .collect();
        Self {
            class,
            expected: expected.len(),
            covered: expected.len() - missing.len(),
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// An ordered batch of operations plus narrative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub summary: String,
    pub estimated_impact: String,
    /// Descriptive answer for read-only queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Results of search calls folded into assistant context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageReport>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Default narrative derived from the operation list.
    pub fn describe(&mut self) {
        let n = self.operations.len();
        if self.summary.is_empty() {
            self.summary = match n {
                0 => "No changes proposed.".to_string(),
                1 => "Proposed 1 change.".to_string(),
                _ => format!("Proposed {} changes.", n),
            };
        }
        if self.estimated_impact.is_empty() {
            let nodes: HashSet<NodeId> =
                self.operations.iter().filter_map(|op| op.target_node()).collect();
            self.estimated_impact = format!(
                "{} operation(s) affecting {} existing node(s).",
                n,
                nodes.len()
            );
        }
    }

    /// Attach a coverage report, appending a warning when it is incomplete.
    pub fn record_coverage(&mut self, report: CoverageReport) {
        if !report.is_complete() {
            let warning = format!(
                "Warning: partial coverage for {}: {} of {} nodes covered; {} could not be planned.",
                report.class.label(),
                report.covered,
                report.expected,
                report.missing.len()
            );
            self.summary = join_sentence(&self.summary, &warning);
            self.estimated_impact = join_sentence(
                &self.estimated_impact,
                &format!("Incomplete: {} node(s) left unchanged.", report.missing.len()),
            );
        }
        self.coverage = Some(report);
    }
}

fn join_sentence(base: &str, extra: &str) -> String {
    if base.trim().is_empty() {
        extra.to_string()
    } else {
        format!("{} {}", base.trim_end(), extra)
    }
}
