//! Plan generation: query + snapshot to a verified plan.

use crate::calls::{translate_calls, Translation};
use crate::classify::{classify, Classification};
use crate::dedup::dedup_last_wins;
use crate::prompt::{build_messages, empty_content_instruction};
use crate::resolver::EntityResolver;
use crate::verify::{rename_operation, verify_empty_content, verify_rename, RepairContext};
use arbor_core::{
    ArborResult, BulkClass, ConversationTurn, CoverageReport, LlmError, NodeId, Plan, PlanMode,
    PlannerConfig, TreeSnapshot,
};
use arbor_llm::{catalog, CompletionRequest, LanguageModel, ModelResponse, ToolChoice};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run one model call under a wall-clock budget.
pub(crate) async fn complete_within(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    budget: Duration,
) -> ArborResult<ModelResponse> {
    match tokio::time::timeout(budget, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            let budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
            warn!(model = model.model_id(), budget_ms, "Model call timed out");
            Err(LlmError::Timeout { budget_ms }.into())
        }
    }
}

/// How a bulk rename will be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkRenameStrategy {
    /// The conversation already names every node: pair them up in tree
    /// order without calling the model.
    DeterministicFill { names: Vec<String> },
    /// Ask the model, then verify and repair.
    ModelAssisted,
}

pub fn resolve_bulk_rename(
    classification: &Classification,
    snapshot: &TreeSnapshot,
) -> BulkRenameStrategy {
    let total = snapshot.node_count();
    if total > 0 && classification.extracted_names.len() >= total {
        BulkRenameStrategy::DeterministicFill {
            names: classification.extracted_names.clone(),
        }
    } else {
        BulkRenameStrategy::ModelAssisted
    }
}

/// Turns natural-language requests into plans.
pub struct PlanGenerator {
    model: Arc<dyn LanguageModel>,
    config: PlannerConfig,
    resolver: EntityResolver,
}

impl PlanGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, config: PlannerConfig) -> Self {
        let resolver = EntityResolver::new(&config);
        Self {
            model,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// Build a plan for `query` against `snapshot`.
    ///
    /// Never fails: model errors and timeouts are logged and described in
    /// the plan summary, and bulk shortfalls are reported via its coverage.
    pub async fn generate(
        &self,
        query: &str,
        snapshot: &TreeSnapshot,
        history: &[ConversationTurn],
        mode: PlanMode,
    ) -> Plan {
        let classification = classify(query, history, snapshot, &self.config, mode);
        info!(
            tree_id = %snapshot.tree_id(),
            bulk = ?classification.bulk,
            extracted_names = classification.extracted_names.len(),
            action_intent = classification.action_intent,
            "Classified query"
        );

        if classification.bulk == Some(BulkClass::BulkRename) {
            if let BulkRenameStrategy::DeterministicFill { names } =
                resolve_bulk_rename(&classification, snapshot)
            {
                return self.deterministic_rename(snapshot, &names);
            }
        }

        let (instruction, expected_ops) = match classification.bulk {
            Some(BulkClass::EmptyContentFill) => {
                let targets = snapshot.empty_content_nodes();
                (
                    Some(empty_content_instruction(snapshot, &targets)),
                    targets.len(),
                )
            }
            Some(BulkClass::BulkRename) => (None, snapshot.node_count()),
            None => (None, 1),
        };

        let tool_choice = if mode == PlanMode::Mutate && classification.action_intent {
            ToolChoice::Required
        } else {
            ToolChoice::Auto
        };
        let request = CompletionRequest {
            messages: build_messages(
                mode,
                snapshot,
                history,
                self.config.history_turns,
                query,
                instruction.as_deref(),
            ),
            functions: catalog(mode),
            tool_choice,
            temperature: self.config.primary_temperature,
            max_tokens: self.config.token_budget(expected_ops),
        };

        let mut failure = None;
        let budget = self.config.primary_timeout;
        let response = match complete_within(self.model.as_ref(), &request, budget).await {
            Ok(response) => {
                debug!(
                    calls = response.function_calls.len(),
                    usage = ?response.usage,
                    "Model responded"
                );
                response
            }
            Err(e) => {
                warn!(tree_id = %snapshot.tree_id(), error = %e, "Plan generation call failed");
                failure = Some(e.to_string());
                ModelResponse::default()
            }
        };

        let Translation {
            operations, notes, ..
        } = translate_calls(&response.function_calls, snapshot, &self.resolver, mode);
        let text = response
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let mut plan = Plan {
            context_notes: notes,
            ..Plan::default()
        };

        if mode == PlanMode::ReadOnly {
            let notes = plan.context_notes.join("\n");
            plan.answer = text.or_else(|| (!notes.is_empty()).then_some(notes));
            plan.summary = match &failure {
                Some(e) => format!("Could not answer: {}", e),
                None => "Answered without proposing changes.".to_string(),
            };
            plan.estimated_impact = "No changes.".to_string();
            return plan;
        }

        if operations.is_empty() && classification.bulk.is_none() && classification.action_intent {
            warn!(tree_id = %snapshot.tree_id(), "Model returned no usable function calls");
        }

        let ctx = RepairContext {
            query,
            snapshot,
            config: &self.config,
            resolver: &self.resolver,
            model: self.model.as_ref(),
            unused_names: &[],
        };
        let (operations, coverage) = match classification.bulk {
            Some(BulkClass::EmptyContentFill) => {
                let (ops, report) = verify_empty_content(operations, &ctx).await;
                (ops, Some(report))
            }
            Some(BulkClass::BulkRename) => {
                let (ops, report) =
                    verify_rename(operations, &classification.extracted_names, &ctx).await;
                (ops, Some(report))
            }
            None => (dedup_last_wins(operations), None),
        };

        plan.operations = operations;
        plan.summary = text.unwrap_or_default();
        if let Some(e) = failure {
            plan.summary = format!("{} Generation failed: {}.", plan.summary, e)
                .trim_start()
                .to_string();
        }
        plan.describe();
        if let Some(report) = coverage {
            plan.record_coverage(report);
        }
        plan
    }

    fn deterministic_rename(&self, snapshot: &TreeSnapshot, names: &[String]) -> Plan {
        let operations: Vec<_> = snapshot
            .nodes_in_order()
            .zip(names)
            .map(|(node, name)| {
                rename_operation(node, name, "Paired in tree order with the supplied name list")
            })
            .collect();
        info!(
            tree_id = %snapshot.tree_id(),
            renamed = operations.len(),
            "Bulk rename planned without a model call"
        );

        let expected: Vec<NodeId> = snapshot.nodes_in_order().map(|n| n.id()).collect();
        let covered: HashSet<NodeId> = operations.iter().filter_map(|op| op.target_node()).collect();
        let mut plan = Plan {
            summary: format!(
                "Rename all {} node(s) from the supplied name list.",
                operations.len()
            ),
            operations,
            ..Plan::default()
        };
        plan.describe();
        plan.record_coverage(CoverageReport::compute(
            BulkClass::BulkRename,
            &expected,
            &covered,
        ));
        plan
    }
}
