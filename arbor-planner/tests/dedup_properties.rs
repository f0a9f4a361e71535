//! Non-bulk plans never carry two operations for the same entity.

use arbor_core::{PlanMode, PlannerConfig};
use arbor_llm::{FunctionCall, ModelResponse, ScriptedLanguageModel};
use arbor_planner::PlanGenerator;
use arbor_test_utils::arb_tree_spec;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_generated_plans_have_one_operation_per_entity(
        spec in arb_tree_spec(),
        picks in proptest::collection::vec((any::<usize>(), 0u8..3), 1..12),
    ) {
        let snapshot = spec.builder().snapshot();
        let nodes: Vec<(String, String)> = snapshot
            .nodes_in_order()
            .map(|n| (n.id().to_string(), n.name().to_string()))
            .collect();
        prop_assume!(!nodes.is_empty());

        let calls: Vec<FunctionCall> = picks
            .iter()
            .enumerate()
            .map(|(i, (pick, kind))| {
                let (id, name) = &nodes[pick % nodes.len()];
                match kind {
                    0 => FunctionCall::new("update_node", json!({"node_id": id, "description": format!("v{}", i)})),
                    1 => FunctionCall::new("update_node_content", json!({"node_identifier": name, "content": format!("c{}", i)})),
                    _ => FunctionCall::new("add_link", json!({"node_id": id, "url": format!("https://example.org/{}", i)})),
                }
            })
            .collect();
        let links = picks.iter().filter(|(_, kind)| *kind >= 2).count();

        let model = Arc::new(ScriptedLanguageModel::with_responses([ModelResponse::calls(calls)]));
        let generator = PlanGenerator::new(model, PlannerConfig::default());
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        let plan = runtime.block_on(generator.generate("tweak these", &snapshot, &[], PlanMode::Mutate));

        let keys: Vec<_> = plan.operations.iter().filter_map(|o| o.dedup_key()).collect();
        let distinct: HashSet<_> = keys.iter().cloned().collect();
        prop_assert_eq!(keys.len(), distinct.len());

        // Link additions create new entities and are all kept.
        let kept_links = plan
            .operations
            .iter()
            .filter(|o| o.operation_type == arbor_core::OperationType::AddLink)
            .count();
        prop_assert_eq!(kept_links, links);
    }
}
