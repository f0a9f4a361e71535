//! Caller-facing facade: propose, apply, or both.

use crate::executor::ExecutionEngine;
use crate::generator::PlanGenerator;
use arbor_core::{
    ArborError, ArborResult, ConversationTurn, EntityIdType, ExecutionReport, PermissionError,
    Plan, PlanMode, TreeExport, TreeId, TreeSnapshot, UserId,
};
use arbor_storage::{Access, DocumentStore, PermissionScope, PermissionService};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A plan and, when it was applied, the execution report.
#[derive(Debug, Clone, Serialize)]
pub struct AssistOutcome {
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

/// Ties the generator and engine to one store and permission service.
pub struct TreeEditService {
    store: Arc<dyn DocumentStore>,
    permissions: Arc<dyn PermissionService>,
    generator: PlanGenerator,
    engine: ExecutionEngine,
}

impl TreeEditService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        permissions: Arc<dyn PermissionService>,
        generator: PlanGenerator,
        engine: ExecutionEngine,
    ) -> Self {
        Self {
            store,
            permissions,
            generator,
            engine,
        }
    }

    async fn require_read(&self, tree_id: TreeId, user: UserId) -> ArborResult<()> {
        let scope = PermissionScope::Tree(tree_id);
        let allowed = match self.permissions.check(user, scope, Access::Read).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(%tree_id, error = %e, "Permission service unavailable, denying read");
                return Err(match e {
                    denied @ ArborError::Permission(_) => denied,
                    other => PermissionError::Unavailable {
                        reason: other.to_string(),
                    }
                    .into(),
                });
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                user_id: user.as_uuid(),
                action: Access::Read.to_string(),
                resource: scope.to_string(),
            }
            .into())
        }
    }

    /// Current snapshot of a tree the user may read.
    pub async fn snapshot(&self, tree_id: TreeId, user: UserId) -> ArborResult<TreeSnapshot> {
        self.require_read(tree_id, user).await?;
        self.store.load_snapshot(tree_id).await
    }

    pub async fn export(&self, tree_id: TreeId, user: UserId) -> ArborResult<TreeExport> {
        Ok(TreeExport::from_snapshot(&self.snapshot(tree_id, user).await?))
    }

    /// Generate a plan without applying it.
    pub async fn propose(
        &self,
        tree_id: TreeId,
        user: UserId,
        query: &str,
        history: &[ConversationTurn],
        mode: PlanMode,
    ) -> ArborResult<Plan> {
        let snapshot = self.snapshot(tree_id, user).await?;
        let plan = self.generator.generate(query, &snapshot, history, mode).await;
        info!(
            %tree_id,
            user_id = %user,
            operations = plan.operations.len(),
            complete = plan.coverage.as_ref().map_or(true, |c| c.is_complete()),
            "Plan proposed"
        );
        Ok(plan)
    }

    /// Apply a previously proposed (possibly edited) plan.
    pub async fn apply(
        &self,
        plan: &Plan,
        tree_id: TreeId,
        user: UserId,
    ) -> ArborResult<ExecutionReport> {
        self.engine.execute(plan, tree_id, user).await
    }

    /// Propose, then apply straight away when `auto_apply` is set and the
    /// plan has operations.
    pub async fn assist(
        &self,
        tree_id: TreeId,
        user: UserId,
        query: &str,
        history: &[ConversationTurn],
        mode: PlanMode,
        auto_apply: bool,
    ) -> ArborResult<AssistOutcome> {
        let plan = self.propose(tree_id, user, query, history, mode).await?;
        let execution = if auto_apply && !plan.is_empty() {
            Some(self.apply(&plan, tree_id, user).await?)
        } else {
            None
        };
        Ok(AssistOutcome { plan, execution })
    }
}
