//! Plan execution with per-operation permission checks.
//!
//! Operations run sequentially and independently: a rejected, failed or
//! skipped operation never stops the ones after it. Only a tree-wide
//! write denial rejects the whole batch up front. When one of an
//! operation's store writes fails, the writes it already made are undone
//! in reverse order before the next operation runs.

use crate::binding::bind_target;
use crate::resolver::EntityResolver;
use arbor_core::{
    ArborError, ArborResult, AttachmentId, Block, BlockId, DependencyId, DependencyType,
    EntityIdType, EntityType, ExecutionReport, LinkId, Node, NodeAttachment, NodeContent,
    NodeDependency, NodeId, NodeLink, NodeStatus, Operation, OperationResult, OperationStatus,
    OperationType, PermissionError, Plan, PlannerConfig, StorageError, TargetKind, TreeId,
    TreeSnapshot, UserId, ValidationError,
};
use arbor_storage::{
    Access, BlockUpdate, DocumentStore, IndexScheduler, NodeUpdate, PermissionScope,
    PermissionService,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn missing_field(field: &str) -> ArborError {
    ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    }
    .into()
}

fn invalid(field: &str, reason: impl Into<String>) -> ArborError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn not_found(entity_type: EntityType, id: impl EntityIdType) -> ArborError {
    StorageError::NotFound {
        entity_type,
        id: id.as_uuid(),
    }
    .into()
}

fn opt_str<'a>(op: &'a Operation, field: &str) -> Option<&'a str> {
    op.change_str(field).map(str::trim).filter(|s| !s.is_empty())
}

fn required_str<'a>(op: &'a Operation, field: &str) -> ArborResult<&'a str> {
    opt_str(op, field).ok_or_else(|| missing_field(field))
}

fn opt_string(op: &Operation, field: &str) -> Option<String> {
    opt_str(op, field).map(str::to_string)
}

fn opt_i32(op: &Operation, field: &str) -> ArborResult<Option<i32>> {
    match op.changes.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid(field, "expected an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(field, "expected an integer")),
        Some(_) => Err(invalid(field, "expected an integer")),
    }
}

fn opt_f32(op: &Operation, field: &str) -> Option<f32> {
    match op.changes.get(field)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_id<T: EntityIdType + std::str::FromStr>(op: &Operation, field: &str) -> ArborResult<T> {
    required_str(op, field)?
        .parse()
        .map_err(|_| invalid(field, "expected a uuid"))
}

fn parse_status(op: &Operation) -> ArborResult<Option<NodeStatus>> {
    opt_str(op, "status")
        .map(|s| NodeStatus::from_db_str(s).map_err(|e| invalid("status", e.to_string())))
        .transpose()
}

/// Default attachment name: last path segment of the URL.
fn file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(url)
        .to_string()
}

/// Clamp a requested position into `0..=len`.
fn clamp_position(requested: Option<i32>, len: i32) -> i32 {
    requested.map_or(len, |p| p.clamp(0, len))
}

/// Position a row holds while it is being moved or removed.
const PARKED: i32 = -1;

/// What a successful apply produced.
struct Applied {
    result: Value,
    /// Node whose indexed text changed.
    reindex: Option<NodeId>,
}

impl Applied {
    fn new(result: Value) -> Self {
        Self {
            result,
            reindex: None,
        }
    }

    fn reindexing(result: Value, node: NodeId) -> Self {
        Self {
            result,
            reindex: Some(node),
        }
    }
}

/// Inverse of one store write.
#[derive(Debug)]
enum Compensation {
    ShiftNodes { block_id: BlockId, from: i32, delta: i32 },
    ShiftBlocks { from: i32, delta: i32 },
    RemoveNode(NodeId),
    RestoreNode(Node),
    RestoreBlockPosition { block_id: BlockId, position: i32 },
}

/// Writes made so far by the operation in flight, replayed in reverse when
/// a later write of the same operation fails.
#[derive(Debug, Default)]
struct Journal {
    steps: Vec<Compensation>,
}

impl Journal {
    fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// Nodes at or after `from` were shifted by `delta`.
    fn shifted_nodes(&mut self, block_id: BlockId, from: i32, delta: i32) {
        self.record(Compensation::ShiftNodes {
            block_id,
            from: from + delta,
            delta: -delta,
        });
    }

    fn shifted_blocks(&mut self, from: i32, delta: i32) {
        self.record(Compensation::ShiftBlocks {
            from: from + delta,
            delta: -delta,
        });
    }
}

/// Applies plans to the document store.
pub struct ExecutionEngine {
    store: Arc<dyn DocumentStore>,
    permissions: Arc<dyn PermissionService>,
    indexer: Arc<dyn IndexScheduler>,
    resolver: EntityResolver,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        permissions: Arc<dyn PermissionService>,
        indexer: Arc<dyn IndexScheduler>,
        config: &PlannerConfig,
    ) -> Self {
        Self {
            store,
            permissions,
            indexer,
            resolver: EntityResolver::new(config),
        }
    }

    /// Ask the permission service, failing closed on error.
    async fn allowed(
        &self,
        user: UserId,
        scope: PermissionScope,
        access: Access,
    ) -> Result<(), String> {
        match self.permissions.check(user, scope, access).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PermissionError::Denied {
                user_id: user.as_uuid(),
                action: access.to_string(),
                resource: scope.to_string(),
            }
            .to_string()),
            Err(e) => {
                warn!(%scope, error = %e, "Permission service unavailable, denying");
                Err(match e {
                    ArborError::Permission(inner) => inner.to_string(),
                    other => PermissionError::Unavailable {
                        reason: other.to_string(),
                    }
                    .to_string(),
                })
            }
        }
    }

    /// Apply `plan` to `tree_id` on behalf of `user`.
    ///
    /// Returns `Err` only when the tree itself cannot be loaded; every
    /// per-operation problem is reported in the result list.
    pub async fn execute(
        &self,
        plan: &Plan,
        tree_id: TreeId,
        user: UserId,
    ) -> ArborResult<ExecutionReport> {
        let tree_scope = PermissionScope::Tree(tree_id);
        if let Err(error) = self.allowed(user, tree_scope, Access::Write).await {
            warn!(
                %tree_id,
                user_id = %user,
                operations = plan.operations.len(),
                "Tree write denied, rejecting plan"
            );
            let results = plan
                .operations
                .iter()
                .map(|op| {
                    OperationResult::unsuccessful(op.operation_id, OperationStatus::Rejected, error.clone())
                })
                .collect();
            // Readers still get the current tree back; nobody else does.
            let tree_snapshot = match self.allowed(user, tree_scope, Access::Read).await {
                Ok(()) => self.store.load_snapshot(tree_id).await.ok(),
                Err(_) => None,
            };
            return Ok(ExecutionReport {
                results,
                tree_snapshot,
            });
        }

        let mut snapshot = self.store.load_snapshot(tree_id).await?;
        let mut stale = false;
        let mut results = Vec::with_capacity(plan.operations.len());

        for op in &plan.operations {
            if stale {
                match self.store.load_snapshot(tree_id).await {
                    Ok(fresh) => {
                        snapshot = fresh;
                        stale = false;
                    }
                    Err(e) => {
                        warn!(%tree_id, operation_id = %op.operation_id, error = %e, "Snapshot reload failed");
                        results.push(OperationResult::unsuccessful(
                            op.operation_id,
                            OperationStatus::Failed,
                            e.to_string(),
                        ));
                        continue;
                    }
                }
            }
            let result = self.execute_one(op.clone(), &snapshot, user).await;
            stale |= result.success;
            results.push(result);
        }

        let tree_snapshot = match self.store.load_snapshot(tree_id).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(%tree_id, error = %e, "Could not reload tree after execution");
                None
            }
        };
        let report = ExecutionReport {
            results,
            tree_snapshot,
        };
        info!(
            %tree_id,
            applied = report.applied_count(),
            unsuccessful = report.failed_count(),
            "Plan executed"
        );
        Ok(report)
    }

    async fn execute_one(
        &self,
        mut op: Operation,
        snapshot: &TreeSnapshot,
        user: UserId,
    ) -> OperationResult {
        let id = op.operation_id;
        let tree_id = snapshot.tree_id();

        if bind_target(snapshot, &self.resolver, &mut op).is_none() {
            let identifier = op
                .target
                .node_identifier
                .clone()
                .or_else(|| op.target.block_identifier.clone())
                .unwrap_or_else(|| op.operation_type.function_name().to_string());
            debug!(operation_id = %id, %identifier, "Skipping unresolved operation");
            return OperationResult::unsuccessful(
                id,
                OperationStatus::Skipped,
                ValidationError::UnresolvedTarget { identifier }.to_string(),
            );
        }

        let scope = match op.operation_type.target_kind() {
            TargetKind::Node => op.target.node_id.map(|n| PermissionScope::Node(tree_id, n)),
            TargetKind::Block => op.target.block_id.map(|b| PermissionScope::Block(tree_id, b)),
            TargetKind::Tree => None,
        }
        .unwrap_or(PermissionScope::Tree(tree_id));
        if let Err(error) = self.allowed(user, scope, Access::Write).await {
            debug!(operation_id = %id, %scope, "Operation rejected");
            return OperationResult::unsuccessful(id, OperationStatus::Rejected, error);
        }

        let mut journal = Journal::default();
        match self.apply(&op, snapshot, &mut journal).await {
            Ok(applied) => {
                if let Some(node) = applied.reindex {
                    self.indexer.schedule(tree_id, node);
                }
                OperationResult::applied(id, applied.result)
            }
            Err(e) => {
                warn!(
                    operation_id = %id,
                    function = op.operation_type.function_name(),
                    writes = journal.steps.len(),
                    error = %e,
                    "Operation failed"
                );
                self.unwind(tree_id, journal).await;
                OperationResult::unsuccessful(id, OperationStatus::Failed, e.to_string())
            }
        }
    }

    /// Undo a failed operation's earlier writes, newest first.
    async fn unwind(&self, tree_id: TreeId, journal: Journal) {
        for step in journal.steps.into_iter().rev() {
            let outcome = match &step {
                Compensation::ShiftNodes {
                    block_id,
                    from,
                    delta,
                } => {
                    self.store
                        .node_shift_positions(tree_id, *block_id, *from, *delta)
                        .await
                }
                Compensation::ShiftBlocks { from, delta } => {
                    self.store.block_shift_positions(tree_id, *from, *delta).await
                }
                Compensation::RemoveNode(node_id) => self.store.node_delete(tree_id, *node_id).await,
                Compensation::RestoreNode(node) => self.store.node_restore(node).await,
                Compensation::RestoreBlockPosition { block_id, position } => self
                    .store
                    .block_update(
                        tree_id,
                        *block_id,
                        BlockUpdate {
                            position: Some(*position),
                            ..Default::default()
                        },
                    )
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = outcome {
                error!(%tree_id, ?step, error = %e, "Compensation failed, tree left inconsistent");
            }
        }
    }

    async fn apply(
        &self,
        op: &Operation,
        snapshot: &TreeSnapshot,
        journal: &mut Journal,
    ) -> ArborResult<Applied> {
        let tree_id = snapshot.tree_id();
        let node_id = || op.target.node_id.ok_or_else(|| missing_field("node_id"));
        let block_id = || op.target.block_id.ok_or_else(|| missing_field("block_id"));

        match op.operation_type {
            OperationType::CreateNode => self.create_node(op, snapshot, block_id()?, journal).await,
            OperationType::UpdateNode => self.update_node(op, snapshot, node_id()?, journal).await,
            OperationType::DeleteNode => {
                let id = node_id()?;
                let node = &snapshot
                    .node(id)
                    .ok_or_else(|| not_found(EntityType::Node, id))?
                    .node;
                self.park_node(node, journal).await?;
                self.store
                    .node_shift_positions(tree_id, node.block_id, node.position + 1, -1)
                    .await?;
                journal.shifted_nodes(node.block_id, node.position + 1, -1);
                self.store.node_delete(tree_id, id).await?;
                Ok(Applied::new(json!({ "deleted": id })))
            }
            OperationType::MoveNode => {
                let target: BlockId = parse_id(op, "target_block_id")?;
                let position = opt_i32(op, "position")?;
                let node = self
                    .move_node(snapshot, node_id()?, target, position, journal)
                    .await?;
                Ok(Applied::new(serde_json::to_value(node).unwrap_or(Value::Null)))
            }
            OperationType::CreateBlock => {
                let name = required_str(op, "name")?;
                let len = snapshot.next_block_position();
                let position = clamp_position(opt_i32(op, "position")?, len);
                let mut block = Block::new(tree_id, name, position);
                block.description = opt_string(op, "description");
                if let Some(block_type) = opt_string(op, "block_type") {
                    block.block_type = block_type;
                }
                if position < len {
                    self.store.block_shift_positions(tree_id, position, 1).await?;
                    journal.shifted_blocks(position, 1);
                }
                self.store.block_insert(&block).await?;
                Ok(Applied::new(json!({ "block_id": block.block_id, "position": position })))
            }
            OperationType::UpdateBlock => {
                let update = BlockUpdate {
                    name: opt_string(op, "name"),
                    description: opt_string(op, "description"),
                    block_type: opt_string(op, "block_type"),
                    position: None,
                };
                if update.is_empty() {
                    return Err(invalid("changes", "no block fields to update"));
                }
                let block = self.store.block_update(tree_id, block_id()?, update).await?;
                Ok(Applied::new(serde_json::to_value(block).unwrap_or(Value::Null)))
            }
            OperationType::DeleteBlock => {
                let id = block_id()?;
                let position = snapshot
                    .block(id)
                    .map(|b| b.block.position)
                    .ok_or_else(|| not_found(EntityType::Block, id))?;
                self.store
                    .block_update(
                        tree_id,
                        id,
                        BlockUpdate {
                            position: Some(PARKED),
                            ..Default::default()
                        },
                    )
                    .await?;
                journal.record(Compensation::RestoreBlockPosition {
                    block_id: id,
                    position,
                });
                self.store.block_shift_positions(tree_id, position + 1, -1).await?;
                journal.shifted_blocks(position + 1, -1);
                self.store.block_delete(tree_id, id).await?;
                Ok(Applied::new(json!({ "deleted": id })))
            }
            OperationType::ReorderBlocks => self.reorder_blocks(op, snapshot, journal).await,
            OperationType::UpdateNodeContent => {
                let id = node_id()?;
                let mut content = NodeContent::new(tree_id, id, required_str(op, "content")?);
                content.summary = opt_string(op, "summary");
                self.store.content_upsert(&content).await?;
                Ok(Applied::reindexing(json!({ "node_id": id }), id))
            }
            OperationType::AddLink => {
                let id = node_id()?;
                let url = required_str(op, "url")?;
                let link = NodeLink {
                    link_id: LinkId::now_v7(),
                    node_id: id,
                    tree_id,
                    name: opt_string(op, "name").unwrap_or_else(|| url.to_string()),
                    url: url.to_string(),
                    description: opt_string(op, "description"),
                    link_type: opt_string(op, "link_type"),
                };
                self.store.link_insert(&link).await?;
                Ok(Applied::reindexing(json!({ "link_id": link.link_id }), id))
            }
            OperationType::RemoveLink => {
                let item = op.target.item_id.ok_or_else(|| missing_field("link_id"))?;
                self.store.link_delete(tree_id, LinkId::new(item)).await?;
                Ok(Applied::reindexing(json!({ "deleted": item }), node_id()?))
            }
            OperationType::AddAttachment => {
                let id = node_id()?;
                let file_url = required_str(op, "file_url")?;
                let attachment = NodeAttachment {
                    attachment_id: AttachmentId::now_v7(),
                    node_id: id,
                    tree_id,
                    name: opt_string(op, "name").unwrap_or_else(|| file_name(file_url)),
                    file_url: file_url.to_string(),
                    file_type: opt_string(op, "file_type"),
                    description: opt_string(op, "description"),
                };
                self.store.attachment_insert(&attachment).await?;
                Ok(Applied::reindexing(
                    json!({ "attachment_id": attachment.attachment_id }),
                    id,
                ))
            }
            OperationType::RemoveAttachment => {
                let item = op.target.item_id.ok_or_else(|| missing_field("attachment_id"))?;
                self.store
                    .attachment_delete(tree_id, AttachmentId::new(item))
                    .await?;
                Ok(Applied::reindexing(json!({ "deleted": item }), node_id()?))
            }
            OperationType::AddDependency => {
                let dependency_type = match opt_str(op, "dependency_type") {
                    Some(s) => DependencyType::from_db_str(s)
                        .map_err(|e| invalid("dependency_type", e.to_string()))?,
                    None => DependencyType::default(),
                };
                let dependency = NodeDependency {
                    dependency_id: DependencyId::now_v7(),
                    tree_id,
                    from_node_id: node_id()?,
                    to_node_id: parse_id(op, "to_node_id")?,
                    dependency_type,
                    evidence_text: opt_string(op, "evidence_text"),
                    confidence: opt_f32(op, "confidence"),
                };
                self.store.dependency_insert(&dependency).await?;
                Ok(Applied::new(json!({ "dependency_id": dependency.dependency_id })))
            }
            OperationType::RemoveDependency => {
                let item = op.target.item_id.ok_or_else(|| missing_field("dependency_id"))?;
                self.store
                    .dependency_delete(tree_id, DependencyId::new(item))
                    .await?;
                Ok(Applied::new(json!({ "deleted": item })))
            }
        }
    }

    /// Take a node out of its block's position sequence.
    async fn park_node(&self, node: &Node, journal: &mut Journal) -> ArborResult<()> {
        self.store
            .node_update(
                node.tree_id,
                node.node_id,
                NodeUpdate {
                    position: Some(PARKED),
                    ..Default::default()
                },
            )
            .await?;
        journal.record(Compensation::RestoreNode(node.clone()));
        Ok(())
    }

    async fn create_node(
        &self,
        op: &Operation,
        snapshot: &TreeSnapshot,
        block_id: BlockId,
        journal: &mut Journal,
    ) -> ArborResult<Applied> {
        let tree_id = snapshot.tree_id();
        if snapshot.block(block_id).is_none() {
            return Err(not_found(EntityType::Block, block_id));
        }
        let name = required_str(op, "name")?;
        let len = snapshot.next_node_position(block_id);
        let position = clamp_position(opt_i32(op, "position")?, len);
        let mut node = Node::new(tree_id, block_id, name, position);
        node.description = opt_string(op, "description");
        if let Some(node_type) = opt_string(op, "node_type") {
            node.node_type = node_type;
        }
        if let Some(status) = parse_status(op)? {
            node.status = status;
        }

        if position < len {
            self.store
                .node_shift_positions(tree_id, block_id, position, 1)
                .await?;
            journal.shifted_nodes(block_id, position, 1);
        }
        self.store.node_insert(&node).await?;
        journal.record(Compensation::RemoveNode(node.node_id));

        let result = json!({ "node_id": node.node_id, "block_id": block_id, "position": position });
        match opt_str(op, "content") {
            Some(text) => {
                let mut content = NodeContent::new(tree_id, node.node_id, text);
                content.summary = opt_string(op, "summary");
                self.store.content_upsert(&content).await?;
                Ok(Applied::reindexing(result, node.node_id))
            }
            None => Ok(Applied::new(result)),
        }
    }

    async fn update_node(
        &self,
        op: &Operation,
        snapshot: &TreeSnapshot,
        node_id: NodeId,
        journal: &mut Journal,
    ) -> ArborResult<Applied> {
        let tree_id = snapshot.tree_id();
        let original = snapshot
            .node(node_id)
            .ok_or_else(|| not_found(EntityType::Node, node_id))?;
        let update = NodeUpdate {
            name: opt_string(op, "name"),
            description: opt_string(op, "description"),
            node_type: opt_string(op, "node_type"),
            status: parse_status(op)?,
            confidence: opt_f32(op, "confidence"),
            block_id: None,
            position: None,
        };
        let content = opt_str(op, "content");
        let position = opt_i32(op, "position")?;
        if update.is_empty() && content.is_none() && position.is_none() {
            return Err(invalid("changes", "no node fields to update"));
        }
        // Name and description feed the search index alongside content.
        let text_changed =
            update.name.is_some() || update.description.is_some() || content.is_some();

        let mut node = None;
        if !update.is_empty() {
            node = Some(self.store.node_update(tree_id, node_id, update).await?);
            journal.record(Compensation::RestoreNode(original.node.clone()));
        }
        if let Some(position) = position {
            let block = original.node.block_id;
            node = Some(
                self.move_node(snapshot, node_id, block, Some(position), journal)
                    .await?,
            );
        }
        let result = node
            .and_then(|n| serde_json::to_value(n).ok())
            .unwrap_or_else(|| json!({ "node_id": node_id }));

        if let Some(text) = content {
            let mut row = NodeContent::new(tree_id, node_id, text);
            row.summary = opt_string(op, "summary");
            self.store.content_upsert(&row).await?;
        }
        Ok(if text_changed {
            Applied::reindexing(result, node_id)
        } else {
            Applied::new(result)
        })
    }

    /// Move a node to `target` at `position` (appended when absent),
    /// keeping positions dense in both blocks.
    async fn move_node(
        &self,
        snapshot: &TreeSnapshot,
        node_id: NodeId,
        target: BlockId,
        position: Option<i32>,
        journal: &mut Journal,
    ) -> ArborResult<Node> {
        let tree_id = snapshot.tree_id();
        let view = snapshot
            .node(node_id)
            .ok_or_else(|| not_found(EntityType::Node, node_id))?;
        let target_view = snapshot
            .block(target)
            .ok_or_else(|| not_found(EntityType::Block, target))?;
        let (source, old_position) = (view.node.block_id, view.node.position);

        let remaining = target_view.nodes.len() as i32 - i32::from(source == target);
        let new_position = clamp_position(position, remaining);

        self.park_node(&view.node, journal).await?;
        self.store
            .node_shift_positions(tree_id, source, old_position + 1, -1)
            .await?;
        journal.shifted_nodes(source, old_position + 1, -1);
        self.store
            .node_shift_positions(tree_id, target, new_position, 1)
            .await?;
        journal.shifted_nodes(target, new_position, 1);
        self.store
            .node_update(
                tree_id,
                node_id,
                NodeUpdate {
                    block_id: Some(target),
                    position: Some(new_position),
                    ..Default::default()
                },
            )
            .await
    }

    async fn reorder_blocks(
        &self,
        op: &Operation,
        snapshot: &TreeSnapshot,
        journal: &mut Journal,
    ) -> ArborResult<Applied> {
        let tree_id = snapshot.tree_id();
        let entries = op
            .changes
            .get("block_order")
            .and_then(Value::as_array)
            .ok_or_else(|| missing_field("block_order"))?;

        let mut order: Vec<BlockId> = Vec::with_capacity(snapshot.block_count());
        let mut seen = HashSet::new();
        for entry in entries {
            let text = entry
                .as_str()
                .ok_or_else(|| invalid("block_order", "entries must be strings"))?;
            let found = self
                .resolver
                .best_block(snapshot, text)
                .ok_or_else(|| invalid("block_order", format!("unknown block '{}'", text)))?;
            if seen.insert(found.block_id) {
                order.push(found.block_id);
            }
        }
        for block in snapshot.blocks() {
            if seen.insert(block.id()) {
                order.push(block.id());
            }
        }

        for (position, block_id) in order.iter().enumerate() {
            let previous = snapshot
                .block(*block_id)
                .map(|b| b.block.position)
                .ok_or_else(|| not_found(EntityType::Block, *block_id))?;
            self.store
                .block_update(
                    tree_id,
                    *block_id,
                    BlockUpdate {
                        position: Some(position as i32),
                        ..Default::default()
                    },
                )
                .await?;
            journal.record(Compensation::RestoreBlockPosition {
                block_id: *block_id,
                position: previous,
            });
        }
        Ok(Applied::new(json!({ "block_order": order })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::OperationTarget;
    use arbor_storage::{AclPermissions, InMemoryStore};
    use arbor_test_utils::{
        block_id, node_id, protocol_results_tree, FailingStore, RecordingScheduler,
        UnreachablePermissions,
    };

    struct Harness {
        store: Arc<InMemoryStore>,
        acl: Arc<AclPermissions>,
        scheduler: Arc<RecordingScheduler>,
        engine: ExecutionEngine,
        tree_id: TreeId,
        user: UserId,
        snapshot: TreeSnapshot,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let tree_id = protocol_results_tree().seed(&store);
        let acl = Arc::new(AclPermissions::new());
        let user = UserId::now_v7();
        acl.grant(tree_id, user, Access::Write);
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = ExecutionEngine::new(
            store.clone(),
            acl.clone(),
            scheduler.clone(),
            &PlannerConfig::default(),
        );
        let snapshot = store.load_snapshot(tree_id).await.unwrap();
        Harness {
            store,
            acl,
            scheduler,
            engine,
            tree_id,
            user,
            snapshot,
        }
    }

    fn plan(operations: Vec<Operation>) -> Plan {
        Plan {
            operations,
            ..Plan::default()
        }
    }

    fn on_node(ty: OperationType, node: NodeId) -> Operation {
        Operation::new(ty, OperationTarget::node(node))
    }

    /// Engine over `h.store` whose `method` fails after `skip` calls.
    fn failing_engine(
        h: &Harness,
        method: &'static str,
        skip: usize,
    ) -> (ExecutionEngine, Arc<FailingStore>) {
        let store = Arc::new(FailingStore::new(h.store.clone(), method, skip));
        let engine = ExecutionEngine::new(
            store.clone(),
            h.acl.clone(),
            h.scheduler.clone(),
            &PlannerConfig::default(),
        );
        (engine, store)
    }

    fn layout(snapshot: &TreeSnapshot) -> Vec<(String, Vec<(String, i32)>)> {
        snapshot
            .blocks()
            .iter()
            .map(|b| {
                let nodes = b
                    .nodes
                    .iter()
                    .map(|n| (n.name().to_string(), n.node.position))
                    .collect();
                (b.name().to_string(), nodes)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let h = harness().await;
        let a = node_id(&h.snapshot, "Step A");
        let ops = vec![
            on_node(OperationType::UpdateNode, NodeId::now_v7()).with_change("name", "Ghost"),
            on_node(OperationType::UpdateNode, a).with_change("name", "Mixing"),
        ];
        let report = h.engine.execute(&plan(ops), h.tree_id, h.user).await.unwrap();

        assert_eq!(report.results[0].status, OperationStatus::Failed);
        assert!(report.results[1].success);
        let fresh = report.tree_snapshot.unwrap();
        assert_eq!(fresh.node(a).unwrap().name(), "Mixing");
    }

    #[tokio::test]
    async fn test_tree_denial_rejects_everything() {
        let h = harness().await;
        let stranger = UserId::now_v7();
        h.acl.grant(h.tree_id, stranger, Access::Read);
        let a = node_id(&h.snapshot, "Step A");
        let ops = vec![
            on_node(OperationType::DeleteNode, a),
            Operation::new(OperationType::CreateBlock, OperationTarget::default())
                .with_change("name", "New"),
        ];
        let report = h.engine.execute(&plan(ops), h.tree_id, stranger).await.unwrap();

        assert!(report
            .results
            .iter()
            .all(|r| r.status == OperationStatus::Rejected));
        let errors: HashSet<_> = report.results.iter().map(|r| r.error.clone()).collect();
        assert_eq!(errors.len(), 1);
        let after = h.store.load_snapshot(h.tree_id).await.unwrap();
        assert_eq!(after.node_count(), 3);
        assert_eq!(after.block_count(), 2);
    }

    #[tokio::test]
    async fn test_stranger_without_grants_gets_no_snapshot() {
        let h = harness().await;
        let stranger = UserId::now_v7();
        let a = node_id(&h.snapshot, "Step A");
        let ops = vec![on_node(OperationType::DeleteNode, a)];

        let report = h.engine.execute(&plan(ops.clone()), h.tree_id, stranger).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Rejected);
        assert!(report.tree_snapshot.is_none());

        let reader = UserId::now_v7();
        h.acl.grant(h.tree_id, reader, Access::Read);
        let report = h.engine.execute(&plan(ops), h.tree_id, reader).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Rejected);
        assert_eq!(report.tree_snapshot.unwrap().node_count(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_permission_service_fails_closed() {
        let h = harness().await;
        let engine = ExecutionEngine::new(
            h.store.clone(),
            Arc::new(UnreachablePermissions),
            h.scheduler.clone(),
            &PlannerConfig::default(),
        );
        let a = node_id(&h.snapshot, "Step A");
        let report = engine
            .execute(&plan(vec![on_node(OperationType::DeleteNode, a)]), h.tree_id, h.user)
            .await
            .unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Rejected);
        assert!(report.results[0].error.as_deref().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_node_lock_rejects_single_operation() {
        let h = harness().await;
        let (a, c) = (node_id(&h.snapshot, "Step A"), node_id(&h.snapshot, "Step C"));
        h.acl.lock_node(h.user, a);
        let ops = vec![
            on_node(OperationType::UpdateNode, a).with_change("name", "Locked"),
            on_node(OperationType::UpdateNode, c).with_change("name", "Open"),
        ];
        let report = h.engine.execute(&plan(ops), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Rejected);
        assert_eq!(report.results[1].status, OperationStatus::Applied);
    }

    #[tokio::test]
    async fn test_unresolved_target_is_skipped() {
        let h = harness().await;
        let op = Operation::new(
            OperationType::DeleteNode,
            OperationTarget {
                node_identifier: Some("Calibration".to_string()),
                ..Default::default()
            },
        );
        let report = h.engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_late_binding_sees_earlier_operations() {
        let h = harness().await;
        let protocol = block_id(&h.snapshot, "Protocol");
        let create = Operation::new(OperationType::CreateNode, OperationTarget::block(protocol))
            .with_change("name", "Calibration");
        let fill = Operation::new(
            OperationType::UpdateNodeContent,
            OperationTarget {
                node_identifier: Some("Calibration".to_string()),
                ..Default::default()
            },
        )
        .with_change("content", "Zero the balance.");
        let report = h
            .engine
            .execute(&plan(vec![create, fill]), h.tree_id, h.user)
            .await
            .unwrap();
        assert_eq!(report.applied_count(), 2);
        let fresh = report.tree_snapshot.unwrap();
        let node = fresh
            .nodes_in_order()
            .find(|n| n.name() == "Calibration")
            .unwrap();
        assert_eq!(node.content.as_deref(), Some("Zero the balance."));
        assert_eq!(node.node.position, 2);
    }

    #[tokio::test]
    async fn test_text_changes_schedule_reindex() {
        let h = harness().await;
        let (a, b, c) = (
            node_id(&h.snapshot, "Step A"),
            node_id(&h.snapshot, "Step B"),
            node_id(&h.snapshot, "Step C"),
        );
        let ops = vec![
            on_node(OperationType::UpdateNodeContent, a).with_change("content", "Mix."),
            on_node(OperationType::UpdateNode, b).with_change("status", "complete"),
            on_node(OperationType::UpdateNode, c).with_change("name", "Readout"),
            on_node(OperationType::UpdateNode, a).with_change("description", "Vortex first"),
            on_node(OperationType::AddLink, b).with_change("url", "https://example.org/a"),
        ];
        let report = h.engine.execute(&plan(ops), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.applied_count(), 5);
        assert_eq!(
            h.scheduler.scheduled(),
            vec![(h.tree_id, a), (h.tree_id, c), (h.tree_id, a), (h.tree_id, b)]
        );
    }

    #[tokio::test]
    async fn test_create_node_shifts_siblings() {
        let h = harness().await;
        let protocol = block_id(&h.snapshot, "Protocol");
        let op = Operation::new(OperationType::CreateNode, OperationTarget::block(protocol))
            .with_change("name", "Prep")
            .with_change("position", 0);
        h.engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();
        let fresh = h.store.load_snapshot(h.tree_id).await.unwrap();
        let names: Vec<&str> = fresh.block(protocol).unwrap().nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["Prep", "Step A", "Step B"]);
        let positions: Vec<i32> = fresh
            .block(protocol)
            .unwrap()
            .nodes
            .iter()
            .map(|n| n.node.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_move_node_between_blocks_keeps_positions_dense() {
        let h = harness().await;
        let a = node_id(&h.snapshot, "Step A");
        let results = block_id(&h.snapshot, "Results");
        let op = on_node(OperationType::MoveNode, a)
            .with_change("target_block_id", results.to_string())
            .with_change("position", 0);
        let report = h.engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();
        assert!(report.results[0].success);

        let fresh = report.tree_snapshot.unwrap();
        let protocol = &fresh.blocks()[0];
        assert_eq!(protocol.nodes.len(), 1);
        assert_eq!(protocol.nodes[0].node.position, 0);
        let moved: Vec<(&str, i32)> = fresh.blocks()[1]
            .nodes
            .iter()
            .map(|n| (n.name(), n.node.position))
            .collect();
        assert_eq!(moved, vec![("Step A", 0), ("Step C", 1)]);
    }

    #[tokio::test]
    async fn test_delete_block_and_reorder() {
        let h = harness().await;
        let create = Operation::new(OperationType::CreateBlock, OperationTarget::default())
            .with_change("name", "Discussion");
        let reorder = Operation::new(OperationType::ReorderBlocks, OperationTarget::default())
            .with_change("block_order", json!(["Discussion", "Results"]));
        let delete = Operation::new(
            OperationType::DeleteBlock,
            OperationTarget::block(block_id(&h.snapshot, "Results")),
        );
        let report = h
            .engine
            .execute(&plan(vec![create, reorder, delete]), h.tree_id, h.user)
            .await
            .unwrap();
        assert_eq!(report.applied_count(), 3);
        let fresh = report.tree_snapshot.unwrap();
        let order: Vec<(&str, i32)> = fresh
            .blocks()
            .iter()
            .map(|b| (b.name(), b.block.position))
            .collect();
        assert_eq!(order, vec![("Discussion", 0), ("Protocol", 1)]);
        assert_eq!(fresh.node_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_status_fails_operation() {
        let h = harness().await;
        let a = node_id(&h.snapshot, "Step A");
        let op = on_node(OperationType::UpdateNode, a).with_change("status", "exploded");
        let report = h.engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Failed);
        assert!(report.results[0].error.as_deref().unwrap().contains("status"));
    }

    #[tokio::test]
    async fn test_attachment_and_dependency_round() {
        let h = harness().await;
        let (a, c) = (node_id(&h.snapshot, "Step A"), node_id(&h.snapshot, "Step C"));
        let ops = vec![
            on_node(OperationType::AddAttachment, c)
                .with_change("file_url", "https://files.example.org/run/plate.csv?sig=1"),
            on_node(OperationType::AddDependency, c)
                .with_change("to_node_identifier", "Step A")
                .with_change("dependency_type", "uses_output"),
        ];
        let report = h.engine.execute(&plan(ops), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.applied_count(), 2);

        let fresh = report.tree_snapshot.unwrap();
        let view = fresh.node(c).unwrap();
        assert_eq!(view.attachments[0].name, "plate.csv");
        assert_eq!(view.dependencies[0].to_node_id, a);
        assert_eq!(view.dependencies[0].dependency_type, DependencyType::Uses);

        let remove = on_node(OperationType::RemoveAttachment, c).with_change("attachment_name", "plate.csv");
        let report = h.engine.execute(&plan(vec![remove]), h.tree_id, h.user).await.unwrap();
        assert!(report.results[0].success);
        assert!(report.tree_snapshot.unwrap().node(c).unwrap().attachments.is_empty());
    }

    #[tokio::test]
    async fn test_removing_another_nodes_link_is_skipped() {
        let h = harness().await;
        let (a, c) = (node_id(&h.snapshot, "Step A"), node_id(&h.snapshot, "Step C"));
        let add = on_node(OperationType::AddLink, c).with_change("url", "https://example.org/raw");
        h.engine.execute(&plan(vec![add]), h.tree_id, h.user).await.unwrap();
        h.acl.lock_node(h.user, c);
        let link = h.store.load_snapshot(h.tree_id).await.unwrap().node(c).unwrap().links[0].link_id;

        let remove = on_node(OperationType::RemoveLink, a).with_change("link_id", link.to_string());
        let report = h.engine.execute(&plan(vec![remove]), h.tree_id, h.user).await.unwrap();
        assert_eq!(report.results[0].status, OperationStatus::Skipped);
        assert_eq!(report.tree_snapshot.unwrap().node(c).unwrap().links.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_move_restores_both_blocks() {
        let h = harness().await;
        let before = layout(&h.snapshot);
        let a = node_id(&h.snapshot, "Step A");
        let results = block_id(&h.snapshot, "Results");
        // Source shift goes through, target shift fails.
        let (engine, store) = failing_engine(&h, "node_shift_positions", 1);
        let op = on_node(OperationType::MoveNode, a)
            .with_change("target_block_id", results.to_string())
            .with_change("position", 0);
        let report = engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();

        assert!(store.tripped());
        assert_eq!(report.results[0].status, OperationStatus::Failed);
        assert_eq!(layout(&report.tree_snapshot.unwrap()), before);
    }

    #[tokio::test]
    async fn test_failed_create_removes_inserted_node() {
        let h = harness().await;
        let before = layout(&h.snapshot);
        let protocol = block_id(&h.snapshot, "Protocol");
        let (engine, _store) = failing_engine(&h, "content_upsert", 0);
        let op = Operation::new(OperationType::CreateNode, OperationTarget::block(protocol))
            .with_change("name", "Prep")
            .with_change("position", 0)
            .with_change("content", "Label the tubes.");
        let report = engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();

        assert_eq!(report.results[0].status, OperationStatus::Failed);
        let fresh = report.tree_snapshot.unwrap();
        assert_eq!(fresh.node_count(), 3);
        assert_eq!(layout(&fresh), before);
        assert!(h.scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_failed_content_write_restores_renamed_node() {
        let h = harness().await;
        let a = node_id(&h.snapshot, "Step A");
        let (engine, _store) = failing_engine(&h, "content_upsert", 0);
        let op = on_node(OperationType::UpdateNode, a)
            .with_change("name", "Mixing")
            .with_change("position", 1)
            .with_change("content", "Stir for a minute.");
        let report = engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();

        assert_eq!(report.results[0].status, OperationStatus::Failed);
        let fresh = report.tree_snapshot.unwrap();
        assert_eq!(fresh.node(a).unwrap().name(), "Step A");
        assert_eq!(layout(&fresh), layout(&h.snapshot));
    }

    #[tokio::test]
    async fn test_failed_block_delete_keeps_block_order() {
        let h = harness().await;
        let protocol = block_id(&h.snapshot, "Protocol");
        let (engine, _store) = failing_engine(&h, "block_delete", 0);
        let op = Operation::new(OperationType::DeleteBlock, OperationTarget::block(protocol));
        let report = engine.execute(&plan(vec![op]), h.tree_id, h.user).await.unwrap();

        assert_eq!(report.results[0].status, OperationStatus::Failed);
        assert_eq!(layout(&report.tree_snapshot.unwrap()), layout(&h.snapshot));
    }

    #[tokio::test]
    async fn test_missing_tree_is_an_error() {
        let h = harness().await;
        let other = TreeId::now_v7();
        h.acl.grant(other, h.user, Access::Write);
        assert!(h.engine.execute(&plan(Vec::new()), other, h.user).await.is_err());
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(file_name("https://x.org/a/b/report.pdf?token=1"), "report.pdf");
        assert_eq!(file_name("https://x.org/a/dir/"), "dir");
        assert_eq!(file_name("plain"), "plain");
    }
}
