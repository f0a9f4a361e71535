//! Function-call translation: model output to operations.

use crate::binding::{bind_target, capture_before};
use crate::resolver::EntityResolver;
use arbor_core::{
    BlockId, FieldChanges, NodeId, Operation, OperationTarget, OperationType, PlanMode,
    TreeSnapshot,
};
use arbor_llm::{FunctionCall, SearchFunction};
use serde_json::{Map, Value};
use std::fmt::Write;
use tracing::{debug, warn};

/// Confidence given to operations whose target is still unresolved.
const UNRESOLVED_CONFIDENCE: f32 = 0.5;

const TARGET_KEYS: [&str; 4] = ["node_id", "node_identifier", "block_id", "block_identifier"];
const META_KEYS: [&str; 2] = ["reasoning", "confidence"];

/// Operations and search results from one model response.
#[derive(Debug, Default)]
pub struct Translation {
    pub operations: Vec<Operation>,
    /// Search-call results, folded into assistant context.
    pub notes: Vec<String>,
    /// Calls dropped as malformed, unknown, or unaddressable.
    pub dropped: usize,
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Build the target from call arguments. An id the snapshot does not know
/// is carried forward as an identifier instead.
fn target_from_args(args: &Map<String, Value>, snapshot: &TreeSnapshot) -> OperationTarget {
    let mut target = OperationTarget {
        node_identifier: str_arg(args, "node_identifier").map(str::to_string),
        block_identifier: str_arg(args, "block_identifier").map(str::to_string),
        ..Default::default()
    };

    if let Some(raw) = str_arg(args, "node_id") {
        match raw.parse::<NodeId>().ok().filter(|id| snapshot.node(*id).is_some()) {
            Some(id) => target.node_id = Some(id),
            None => {
                target.node_identifier.get_or_insert_with(|| raw.to_string());
            }
        }
    }
    if let Some(raw) = str_arg(args, "block_id") {
        match raw.parse::<BlockId>().ok().filter(|id| snapshot.block(*id).is_some()) {
            Some(id) => target.block_id = Some(id),
            None => {
                target.block_identifier.get_or_insert_with(|| raw.to_string());
            }
        }
    }
    target
}

fn changes_from_args(args: &Map<String, Value>) -> FieldChanges {
    args.iter()
        .filter(|(k, v)| {
            !TARGET_KEYS.contains(&k.as_str()) && !META_KEYS.contains(&k.as_str()) && !v.is_null()
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Answer a search call against the snapshot.
fn run_search(
    search: SearchFunction,
    args: &Map<String, Value>,
    snapshot: &TreeSnapshot,
    resolver: &EntityResolver,
) -> String {
    let query = str_arg(args, "query").unwrap_or_default();
    let mut note = String::new();
    match search {
        SearchFunction::FindNode => {
            let _ = write!(note, "find_node(\"{}\"):", query);
            let found = resolver.resolve_node(snapshot, query, None);
            if found.is_empty() {
                note.push_str(" no match");
            }
            for m in found {
                let Some(node) = snapshot.node(m.node_id) else { continue };
                let block = snapshot.block_of(m.node_id).map(|b| b.name()).unwrap_or("?");
                let _ = write!(
                    note,
                    " {} (id {}, block {}, confidence {:.2});",
                    node.name(),
                    m.node_id,
                    block,
                    m.confidence
                );
            }
        }
        SearchFunction::FindBlock => {
            let _ = write!(note, "find_block(\"{}\"):", query);
            let found = resolver.resolve_block(snapshot, query);
            if found.is_empty() {
                note.push_str(" no match");
            }
            for m in found {
                let Some(block) = snapshot.block(m.block_id) else { continue };
                let _ = write!(
                    note,
                    " {} (id {}, {} node(s), confidence {:.2});",
                    block.name(),
                    m.block_id,
                    block.nodes.len(),
                    m.confidence
                );
            }
        }
    }
    note
}

/// Turn one parsed call into an operation, or `None` if it cannot be addressed.
pub fn operation_from_call(
    ty: OperationType,
    args: &Map<String, Value>,
    snapshot: &TreeSnapshot,
    resolver: &EntityResolver,
) -> Option<Operation> {
    let mut op = Operation::new(ty, target_from_args(args, snapshot));
    op.changes = changes_from_args(args);
    if let Some(reasoning) = str_arg(args, "reasoning") {
        op.reasoning = reasoning.to_string();
    }

    if !op.is_addressable() {
        return None;
    }

    let resolution = bind_target(snapshot, resolver, &mut op);
    let confidence = args
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .or(resolution)
        .unwrap_or(UNRESOLVED_CONFIDENCE);
    op = op.with_confidence(confidence);
    op.before = capture_before(snapshot, &op);
    Some(op)
}

/// Translate every call in a response. Malformed and unknown calls are
/// dropped one by one; the rest of the response still counts.
pub fn translate_calls(
    calls: &[FunctionCall],
    snapshot: &TreeSnapshot,
    resolver: &EntityResolver,
    mode: PlanMode,
) -> Translation {
    let mut out = Translation::default();

    for call in calls {
        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(function = %call.name, error = %e, "Dropping function call with malformed arguments");
                out.dropped += 1;
                continue;
            }
        };

        if let Some(search) = SearchFunction::from_name(&call.name) {
            out.notes.push(run_search(search, &args, snapshot, resolver));
            continue;
        }

        let Some(ty) = OperationType::from_function_name(&call.name) else {
            warn!(function = %call.name, "Dropping call to unknown function");
            out.dropped += 1;
            continue;
        };

        if mode == PlanMode::ReadOnly {
            debug!(function = %call.name, "Ignoring mutating call in read-only mode");
            out.dropped += 1;
            continue;
        }

        match operation_from_call(ty, &args, snapshot, resolver) {
            Some(op) => {
                if !op.is_resolved() {
                    debug!(
                        function = %call.name,
                        operation_id = %op.operation_id,
                        "Target left for execution-time resolution"
                    );
                }
                out.operations.push(op);
            }
            None => {
                warn!(function = %call.name, "Discarding operation without a target");
                out.dropped += 1;
            }
        }
    }
    out
}
