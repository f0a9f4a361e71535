//! ARBOR Core - Entity Types
//!
//! Pure data structures shared by every other crate in the workspace:
//! identifiers, tree entities, the read-only tree snapshot, operations and
//! plans, execution results, errors and planner configuration.
//! This crate performs no I/O.

pub mod config;
pub mod conversation;
pub mod embedding;
pub mod entities;
pub mod enums;
pub mod error;
pub mod execution;
pub mod export;
pub mod identity;
pub mod operation;
pub mod plan;
pub mod snapshot;

pub use config::PlannerConfig;
pub use conversation::{recent_turns, ConversationTurn, TurnRole};
pub use embedding::EmbeddingVector;
pub use entities::{Block, Node, NodeAttachment, NodeContent, NodeDependency, NodeLink, Tree};
pub use enums::{DependencyType, EntityType, NodeStatus, ParseEnumError};
pub use error::{
    ArborError, ArborResult, ConfigError, LlmError, PermissionError, StorageError,
    ValidationError,
};
pub use execution::{ExecutionReport, OperationResult, OperationStatus};
pub use export::{
    ExportSummary, ExportedAttachment, ExportedBlock, ExportedDependency, ExportedLink,
    ExportedNode, ExportedTree, TreeExport, TreeRows,
};
pub use identity::{
    compute_content_hash, AttachmentId, BlockId, ContentHash, DependencyId, EntityIdType,
    LinkId, NodeId, OperationId, Timestamp, TreeId, UserId,
};
pub use operation::{
    EntityRef, FieldChanges, Operation, OperationClass, OperationTarget, OperationType,
    TargetKind,
};
pub use plan::{BulkClass, CoverageReport, Plan, PlanMode};
pub use snapshot::{BlockView, NodeView, TreeSnapshot};
