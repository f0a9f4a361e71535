//! Execution result shapes

use crate::{OperationId, TreeSnapshot};
use serde::Serialize;
use serde_json::Value;

/// Terminal state of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Applied,
    /// Denied by the permission service (or the service was unreachable).
    Rejected,
    /// The store mutation failed.
    Failed,
    /// The target could not be resolved.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation_id: OperationId,
    pub success: bool,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn applied(operation_id: OperationId, result: Value) -> Self {
        Self {
            operation_id,
            success: true,
            status: OperationStatus::Applied,
            result: Some(result),
            error: None,
        }
    }

    pub fn unsuccessful(
        operation_id: OperationId,
        status: OperationStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation_id,
            success: false,
            status,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Per-operation outcomes plus the tree as it stands afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub results: Vec<OperationResult>,
    /// `None` only when the tree could not be reloaded after execution.
    pub tree_snapshot: Option<TreeSnapshot>,
}

impl ExecutionReport {
    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.applied_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_result_serializes_caller_shape() {
        let id = OperationId::now_v7();
        let ok = OperationResult::applied(id, serde_json::json!({"node_id": "x"}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["operationId"], serde_json::json!(id.to_string()));
        assert_eq!(json["success"], serde_json::json!(true));
        assert!(json.get("error").is_none());

        let failed = OperationResult::unsuccessful(id, OperationStatus::Rejected, "denied");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], serde_json::json!("rejected"));
        assert_eq!(json["error"], serde_json::json!("denied"));
    }

    #[test]
    fn test_report_counts() {
        let report = ExecutionReport {
            results: vec![
                OperationResult::applied(OperationId::now_v7(), Value::Null),
                OperationResult::unsuccessful(OperationId::now_v7(), OperationStatus::Failed, "x"),
            ],
            tree_snapshot: None,
        };
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.failed_count(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("treeSnapshot").is_some());
    }
}
