//! Query classification for bulk-completeness checks.

use arbor_core::{recent_turns, BulkClass, ConversationTurn, PlanMode, PlannerConfig, TreeSnapshot};
use once_cell::sync::Lazy;
use regex::Regex;

static EMPTY_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:empty|blank|missing|unfilled|no)\s+(?:node\s+)?(?:content|text|body|bodies)\b|\bnodes?\s+(?:without|with\s+no|lacking|missing)\s+(?:any\s+)?(?:content|text)\b|\bwhere\s+content\s+is\s+(?:empty|missing|blank)\b|\bcontent\s+is\s+(?:empty|missing|blank)\b",
    )
    .expect("empty-content pattern is valid")
});

static BULK_RENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:rename|retitle)\s+(?:all|every|each)\b|\b(?:rename|retitle)\s+(?:the\s+)?nodes\b|\b(?:fix|update|change|correct)\s+(?:all\s+)?(?:the\s+)?(?:node\s+)?(?:names|titles)\b|\bnames?\s+(?:from|per|according\s+to)\s+(?:the|this|that|my)\s+list\b",
    )
    .expect("bulk-rename pattern is valid")
});

static NAME_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bnode\s*:\s*([^/\n|;]+)").expect("name-entry pattern is valid"));

static ACTION_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:add|create|insert|update|change|edit|modify|rename|retitle|delete|remove|drop|move|reorder|fill|populate|write|set|fix|link|attach|connect|replace)\b",
    )
    .expect("action-verb pattern is valid")
});

/// What a query asks for, as far as bulk verification is concerned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub bulk: Option<BulkClass>,
    /// Names from `node: <name>` entries, history first, in order.
    pub extracted_names: Vec<String>,
    /// The query contains an editing verb.
    pub action_intent: bool,
}

/// Pull `node: <name>` entries from the recent history and then the query.
///
/// Repeated names are kept, since two nodes may share a name. A turn whose
/// entries repeat the previous list exactly is a re-paste and is dropped.
pub fn extract_node_names(query: &str, history: &[ConversationTurn], turns: usize) -> Vec<String> {
    let texts = recent_turns(history, turns)
        .iter()
        .map(|t| t.content.as_str())
        .chain(std::iter::once(query));

    let mut names = Vec::new();
    let mut previous: Vec<String> = Vec::new();
    for text in texts {
        let entries: Vec<String> = NAME_ENTRY
            .captures_iter(text)
            .map(|caps| {
                caps[1]
                    .trim()
                    .trim_matches(|c: char| c == '"' || c == '\'')
                    .trim()
                    .to_string()
            })
            .filter(|name| !name.is_empty())
            .collect();
        if entries.is_empty() || entries == previous {
            continue;
        }
        names.extend(entries.iter().cloned());
        previous = entries;
    }
    names
}

pub fn is_empty_content_query(query: &str) -> bool {
    EMPTY_CONTENT.is_match(query)
}

pub fn is_bulk_rename_phrase(query: &str) -> bool {
    BULK_RENAME.is_match(query)
}

pub fn has_action_intent(query: &str) -> bool {
    ACTION_VERB.is_match(query)
}

/// Classify a query against one tree.
///
/// Empty-content fill takes precedence over bulk rename. A rename is also
/// inferred when the conversation carries a name list covering at least
/// `rename_list_coverage` of the tree's nodes. Read-only queries are never bulk.
pub fn classify(
    query: &str,
    history: &[ConversationTurn],
    snapshot: &TreeSnapshot,
    config: &PlannerConfig,
    mode: PlanMode,
) -> Classification {
    let extracted_names = extract_node_names(query, history, config.history_turns);
    let action_intent = has_action_intent(query);

    let bulk = if mode == PlanMode::ReadOnly {
        None
    } else if is_empty_content_query(query) {
        Some(BulkClass::EmptyContentFill)
    } else if is_bulk_rename_phrase(query) || covers_tree(extracted_names.len(), snapshot, config) {
        Some(BulkClass::BulkRename)
    } else {
        None
    };

    Classification {
        bulk,
        extracted_names,
        action_intent,
    }
}

fn covers_tree(names: usize, snapshot: &TreeSnapshot, config: &PlannerConfig) -> bool {
    let total = snapshot.node_count();
    names > 0 && total > 0 && names as f32 >= config.rename_list_coverage * total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_test_utils::{protocol_results_tree, TreeBuilder};

    fn classify_query(query: &str, history: &[ConversationTurn]) -> Classification {
        let snapshot = protocol_results_tree().snapshot();
        classify(query, history, &snapshot, &PlannerConfig::default(), PlanMode::Mutate)
    }

    #[test]
    fn test_empty_content_phrases() {
        for q in [
            "fill all nodes with empty content",
            "Write text for every node without content",
            "populate the blank content please",
            "Fill in nodes where content is missing",
        ] {
            assert_eq!(classify_query(q, &[]).bulk, Some(BulkClass::EmptyContentFill), "{}", q);
        }
    }

    #[test]
    fn test_rename_phrases() {
        for q in ["rename all nodes", "Fix the node names", "rename nodes to match my list"] {
            assert_eq!(classify_query(q, &[]).bulk, Some(BulkClass::BulkRename), "{}", q);
        }
        assert_eq!(classify_query("rename Step A to Mixing", &[]).bulk, None);
    }

    #[test]
    fn test_empty_content_wins_over_rename() {
        let c = classify_query("rename all nodes and fill the empty content", &[]);
        assert_eq!(c.bulk, Some(BulkClass::EmptyContentFill));
    }

    #[test]
    fn test_names_from_history_then_query() {
        let history = vec![
            ConversationTurn::user("node: Alpha / node: Beta"),
            ConversationTurn::assistant("Noted."),
        ];
        let c = classify_query("also node: Gamma", &history);
        assert_eq!(c.extracted_names, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_repeated_names_survive_but_repastes_do_not() {
        let list = "node: Wash / node: Wash / node: Read";
        let history = vec![
            ConversationTurn::user(list),
            ConversationTurn::assistant("Noted."),
        ];
        let c = classify_query(list, &history);
        assert_eq!(c.extracted_names, vec!["Wash", "Wash", "Read"]);
        assert_eq!(c.bulk, Some(BulkClass::BulkRename));
    }

    #[test]
    fn test_name_list_covering_tree_implies_rename() {
        let history = vec![ConversationTurn::user("node: Alpha\nnode: Beta\nnode: Gamma")];
        let c = classify_query("use these please", &history);
        assert_eq!(c.bulk, Some(BulkClass::BulkRename));

        let short = vec![ConversationTurn::user("node: Alpha")];
        assert_eq!(classify_query("use these please", &short).bulk, None);
    }

    #[test]
    fn test_read_only_is_never_bulk() {
        let snapshot = TreeBuilder::new("t").block("B").node("A").snapshot();
        let c = classify(
            "which nodes have empty content?",
            &[],
            &snapshot,
            &PlannerConfig::default(),
            PlanMode::ReadOnly,
        );
        assert_eq!(c.bulk, None);
    }

    #[test]
    fn test_action_intent() {
        assert!(has_action_intent("Please add a link to Step A"));
        assert!(!has_action_intent("what does Step A do?"));
    }

    #[test]
    fn test_old_history_is_ignored() {
        let mut history = vec![ConversationTurn::user("node: Ancient")];
        for i in 0..10 {
            history.push(ConversationTurn::assistant(format!("reply {}", i)));
        }
        let names = extract_node_names("", &history, PlannerConfig::default().history_turns);
        assert!(names.is_empty());
    }
}
