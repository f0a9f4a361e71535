//! Entity resolution: free text to node and block ids.
//!
//! Confidence tiers, highest first:
//!
//! | Match                               | Confidence        |
//! |-------------------------------------|-------------------|
//! | literal UUID                        | 1.0               |
//! | exact name (case/space-insensitive) | 0.95              |
//! | positional phrase ("first node")    | 0.85              |
//! | fuzzy substring / token overlap     | 0.45 ..= 0.7      |
//! | wider-scope fallback                | at most 0.4       |
//!
//! Resolution never fails; an empty result means "unresolved".

use arbor_core::{BlockId, BlockView, NodeId, NodeView, PlannerConfig, TreeSnapshot};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

const UUID_CONFIDENCE: f32 = 1.0;
const EXACT_CONFIDENCE: f32 = 0.95;
const POSITIONAL_CONFIDENCE: f32 = 0.85;
const FUZZY_MAX: f32 = 0.7;
const FUZZY_MIN: f32 = 0.45;
const WIDENED_MAX: f32 = 0.4;

static ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:the\s+)?(first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|last|\d+(?:st|nd|rd|th))\s+(node|step|item|block|section)(?:\s+(?:in|of|from)\s+(?:the\s+)?(.+?))?$",
    )
    .expect("ordinal pattern is valid")
});

static NUMBERED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:the\s+)?(node|step|item|block|section)\s*(?:(?:at\s+)?position\s+|#\s*|number\s+|no\.?\s*)(\d+)(?:\s+(?:in|of|from)\s+(?:the\s+)?(.+?))?$",
    )
    .expect("numbered pattern is valid")
});

/// A resolved node candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeMatch {
    pub node_id: NodeId,
    pub block_id: BlockId,
    pub confidence: f32,
}

/// A resolved block candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlockMatch {
    pub block_id: BlockId,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ordinal {
    /// Zero-based index.
    Index(usize),
    Last,
}

impl Ordinal {
    fn pick<T>(self, items: &[T]) -> Option<&T> {
        match self {
            Self::Index(i) => items.get(i),
            Self::Last => items.last(),
        }
    }
}

#[derive(Debug)]
struct Positional {
    ordinal: Ordinal,
    is_block: bool,
    qualifier: Option<String>,
}

fn parse_ordinal_word(word: &str) -> Option<Ordinal> {
    let index = match word {
        "first" => 0,
        "second" => 1,
        "third" => 2,
        "fourth" => 3,
        "fifth" => 4,
        "sixth" => 5,
        "seventh" => 6,
        "eighth" => 7,
        "ninth" => 8,
        "tenth" => 9,
        "last" => return Some(Ordinal::Last),
        numeric => {
            let digits: String = numeric.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<usize>().ok()?.checked_sub(1)?
        }
    };
    Some(Ordinal::Index(index))
}

fn parse_positional(normalized: &str) -> Option<Positional> {
    let is_block_word = |w: &str| matches!(w, "block" | "section");
    if let Some(caps) = ORDINAL.captures(normalized) {
        return Some(Positional {
            ordinal: parse_ordinal_word(&caps[1])?,
            is_block: is_block_word(&caps[2]),
            qualifier: caps.get(3).map(|m| m.as_str().to_string()),
        });
    }
    if let Some(caps) = NUMBERED.captures(normalized) {
        // Positions in phrases are 1-based, as users count them.
        let n: usize = caps[2].parse().ok()?;
        return Some(Positional {
            ordinal: Ordinal::Index(n.checked_sub(1)?),
            is_block: is_block_word(&caps[1]),
            qualifier: caps.get(3).map(|m| m.as_str().to_string()),
        });
    }
    None
}

/// Lowercase, strip quotes and punctuation at the edges, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | ',' | ':' | ';'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn strip_suffix_word<'a>(text: &'a str, word: &str) -> &'a str {
    text.strip_suffix(word)
        .map(str::trim_end)
        .filter(|s| !s.is_empty())
        .unwrap_or(text)
}

fn tokens(text: &str) -> HashSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Fuzzy score in `FUZZY_MIN..=FUZZY_MAX`, or `None` for no meaningful overlap.
fn fuzzy_score(query: &str, name: &str) -> Option<f32> {
    if query.is_empty() || name.is_empty() {
        return None;
    }
    let (shorter, longer) = if query.len() <= name.len() {
        (query, name)
    } else {
        (name, query)
    };
    if longer.contains(shorter) {
        let ratio = shorter.len() as f32 / longer.len() as f32;
        return Some(FUZZY_MIN + 0.1 + (FUZZY_MAX - FUZZY_MIN - 0.1) * ratio);
    }
    let (q, n) = (tokens(query), tokens(name));
    let union = q.union(&n).count();
    if union == 0 {
        return None;
    }
    let jaccard = q.intersection(&n).count() as f32 / union as f32;
    (jaccard >= 0.34).then(|| FUZZY_MIN + 0.1 * jaccard)
}

fn is_exact_node_name(name: &str, normalized: &str) -> bool {
    let name = normalize(name);
    name == normalized || name == strip_suffix_word(normalized, "node")
}

fn is_exact_block_name(name: &str, normalized: &str) -> bool {
    let name = normalize(name);
    name == normalized
        || strip_suffix_word(&name, "block") == strip_suffix_word(normalized, "block")
}

fn parse_uuid(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text.trim()).ok()
}

/// Maps natural-language identifiers to entities of one snapshot.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    limit: usize,
    widening_penalty: f32,
}

impl EntityResolver {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            limit: config.resolver_limit.max(1),
            widening_penalty: config.scope_widening_penalty.clamp(0.0, 1.0),
        }
    }

    /// Ranked block candidates for `query`.
    pub fn resolve_block(&self, snapshot: &TreeSnapshot, query: &str) -> Vec<BlockMatch> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }
        if let Some(id) = parse_uuid(&normalized).map(BlockId::from) {
            return snapshot
                .block(id)
                .map(|b| {
                    vec![BlockMatch {
                        block_id: b.id(),
                        confidence: UUID_CONFIDENCE,
                    }]
                })
                .unwrap_or_default();
        }
        // A block literally named like a positional phrase keeps its name.
        let named = snapshot
            .blocks()
            .iter()
            .any(|b| is_exact_block_name(b.name(), &normalized));
        if let Some(pos) = parse_positional(&normalized).filter(|p| p.is_block && !named) {
            return pos
                .ordinal
                .pick(snapshot.blocks())
                .map(|b| {
                    vec![BlockMatch {
                        block_id: b.id(),
                        confidence: POSITIONAL_CONFIDENCE,
                    }]
                })
                .unwrap_or_default();
        }

        let wanted = strip_suffix_word(&normalized, "block");
        let mut matches: Vec<(usize, BlockMatch)> = snapshot
            .blocks()
            .iter()
            .enumerate()
            .filter_map(|(rank, block)| {
                let name = normalize(block.name());
                let bare = strip_suffix_word(&name, "block");
                let confidence = if is_exact_block_name(block.name(), &normalized) {
                    EXACT_CONFIDENCE
                } else {
                    fuzzy_score(wanted, bare)?
                };
                Some((
                    rank,
                    BlockMatch {
                        block_id: block.id(),
                        confidence,
                    },
                ))
            })
            .collect();
        matches.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence).then(a.0.cmp(&b.0)));
        matches
            .into_iter()
            .take(self.limit)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn best_block(&self, snapshot: &TreeSnapshot, query: &str) -> Option<BlockMatch> {
        self.resolve_block(snapshot, query).into_iter().next()
    }

    /// Ranked node candidates for `query`, searched within `block_scope`
    /// first and widened to the whole tree only when the scope yields nothing.
    pub fn resolve_node(
        &self,
        snapshot: &TreeSnapshot,
        query: &str,
        block_scope: Option<BlockId>,
    ) -> Vec<NodeMatch> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        if let Some(id) = parse_uuid(&normalized).map(NodeId::from) {
            return snapshot
                .node(id)
                .map(|n| {
                    vec![NodeMatch {
                        node_id: n.id(),
                        block_id: n.node.block_id,
                        confidence: UUID_CONFIDENCE,
                    }]
                })
                .unwrap_or_default();
        }

        let named = snapshot
            .nodes_in_order()
            .any(|n| is_exact_node_name(n.name(), &normalized));
        if let Some(pos) = parse_positional(&normalized).filter(|p| !p.is_block && !named) {
            if let Some(found) = self.resolve_positional(snapshot, &pos, block_scope) {
                return vec![found];
            }
        }

        let scoped: Option<&BlockView> = block_scope.and_then(|b| snapshot.block(b));
        if let Some(block) = scoped {
            let found = self.rank_by_name(snapshot, block.nodes.iter(), &normalized, 1.0, None);
            if !found.is_empty() {
                return found;
            }
        }

        let (factor, cap) = if scoped.is_some() {
            (self.widening_penalty, Some(WIDENED_MAX))
        } else {
            (1.0, None)
        };
        self.rank_by_name(snapshot, snapshot.nodes_in_order(), &normalized, factor, cap)
    }

    pub fn best_node(
        &self,
        snapshot: &TreeSnapshot,
        query: &str,
        block_scope: Option<BlockId>,
    ) -> Option<NodeMatch> {
        self.resolve_node(snapshot, query, block_scope).into_iter().next()
    }

    fn resolve_positional(
        &self,
        snapshot: &TreeSnapshot,
        pos: &Positional,
        block_scope: Option<BlockId>,
    ) -> Option<NodeMatch> {
        let block = match &pos.qualifier {
            Some(q) => Some(self.best_block(snapshot, q)?.block_id),
            None => block_scope,
        };
        let node: &NodeView = match block.and_then(|b| snapshot.block(b)) {
            Some(view) => pos.ordinal.pick(&view.nodes)?,
            None => {
                let all: Vec<&NodeView> = snapshot.nodes_in_order().collect();
                *pos.ordinal.pick(&all)?
            }
        };
        Some(NodeMatch {
            node_id: node.id(),
            block_id: node.node.block_id,
            confidence: POSITIONAL_CONFIDENCE,
        })
    }

    fn rank_by_name<'a>(
        &self,
        snapshot: &TreeSnapshot,
        nodes: impl Iterator<Item = &'a NodeView>,
        normalized: &str,
        factor: f32,
        cap: Option<f32>,
    ) -> Vec<NodeMatch> {
        let wanted = strip_suffix_word(normalized, "node");
        let mut matches: Vec<(usize, NodeMatch)> = nodes
            .filter_map(|node| {
                let name = normalize(node.name());
                let base = if is_exact_node_name(node.name(), normalized) {
                    EXACT_CONFIDENCE
                } else {
                    fuzzy_score(wanted, &name)?
                };
                let mut confidence = base * factor;
                if let Some(cap) = cap {
                    confidence = confidence.min(cap);
                }
                let rank = snapshot.tree_order_rank(node.id()).unwrap_or(usize::MAX);
                Some((
                    rank,
                    NodeMatch {
                        node_id: node.id(),
                        block_id: node.node.block_id,
                        confidence,
                    },
                ))
            })
            .collect();
        matches.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence).then(a.0.cmp(&b.0)));
        matches
            .into_iter()
            .take(self.limit)
            .map(|(_, m)| m)
            .collect()
    }
}
