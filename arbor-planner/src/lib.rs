//! ARBOR Planner - Mutation Planning and Execution
//!
//! Turns a natural-language request about one tree into a reviewable
//! [`Plan`](arbor_core::Plan) of typed operations, then applies accepted
//! plans operation by operation under per-entity permission checks.
//!
//! Pipeline:
//! 1. [`classify`] detects bulk requests and names listed in the conversation.
//! 2. [`PlanGenerator`] asks the model for function calls and translates them
//!    into operations, resolving targets with the [`EntityResolver`].
//! 3. [`verify`] enforces bulk completeness and runs repair strategies.
//! 4. [`dedup_last_wins`] collapses repeated edits of the same entity.
//! 5. [`ExecutionEngine`] applies the plan and reports per-operation results.

pub mod binding;
pub mod calls;
pub mod classify;
pub mod dedup;
pub mod executor;
pub mod generator;
pub mod indexer;
pub mod prompt;
pub mod resolver;
pub mod service;
pub mod verify;

pub use binding::{bind_target, capture_before};
pub use calls::{operation_from_call, translate_calls, Translation};
pub use classify::{classify, extract_node_names, Classification};
pub use dedup::dedup_last_wins;
pub use executor::ExecutionEngine;
pub use generator::{resolve_bulk_rename, BulkRenameStrategy, PlanGenerator};
pub use indexer::{indexed_text, EmbeddingIndexer, ReindexOutcome};
pub use resolver::{BlockMatch, EntityResolver, NodeMatch};
pub use service::{AssistOutcome, TreeEditService};
pub use verify::{RepairContext, RepairStrategy};
