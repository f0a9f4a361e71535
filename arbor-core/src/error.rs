//! Error types for ARBOR operations

use crate::EntityType;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("cannot insert {entity_type}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("{constraint} violated: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("no language model configured")]
    ProviderNotConfigured,

    #[error("{provider} returned status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("{provider} rate limit hit, retry in {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("unusable response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("model call exceeded its {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    /// A function call whose argument JSON did not decode.
    #[error("bad arguments to {function}: {reason}")]
    MalformedArguments { function: String, reason: String },

    #[error("embedding failed: {reason}")]
    EmbeddingFailed { reason: String },
}

/// Rejections of an operation's payload or target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing {field}")]
    RequiredFieldMissing { field: String },

    #[error("{field} is invalid: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("no node or block matches '{identifier}'")]
    UnresolvedTarget { identifier: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field}={value} rejected: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("user {user_id} may not {action} {resource}")]
    Denied {
        user_id: Uuid,
        action: String,
        resource: String,
    },

    #[error("permission backend unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Top-level error returned across crate boundaries.
#[derive(Debug, Clone, Error)]
pub enum ArborError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("model: {0}")]
    Llm(#[from] LlmError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("permission: {0}")]
    Permission(#[from] PermissionError),
}

pub type ArborResult<T> = Result<T, ArborError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Node,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("Node"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_llm_error_display_timeout() {
        let err = LlmError::Timeout { budget_ms: 60_000 };
        let msg = format!("{}", err);
        assert!(msg.contains("60000ms"));
    }

    #[test]
    fn test_llm_error_display_malformed_arguments() {
        let err = LlmError::MalformedArguments {
            function: "update_node".to_string(),
            reason: "expected value at line 1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("update_node"));
        assert!(msg.contains("line 1"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "rename_list_coverage".to_string(),
            value: "1.5".to_string(),
            reason: "must be within 0..=1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("rename_list_coverage"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_permission_error_display_denied() {
        let err = PermissionError::Denied {
            user_id: Uuid::nil(),
            action: "write".to_string(),
            resource: "tree".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("may not"));
        assert!(msg.contains("write"));
        assert!(msg.contains("tree"));
    }

    #[test]
    fn test_arbor_error_from_variants() {
        let storage = ArborError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, ArborError::Storage(_)));

        let llm = ArborError::from(LlmError::ProviderNotConfigured);
        assert!(matches!(llm, ArborError::Llm(_)));

        let validation = ArborError::from(ValidationError::UnresolvedTarget {
            identifier: "Step Z".to_string(),
        });
        assert!(matches!(validation, ArborError::Validation(_)));

        let config = ArborError::from(ConfigError::InvalidValue {
            field: "min_similarity".to_string(),
            value: "2".to_string(),
            reason: "out of range".to_string(),
        });
        assert!(matches!(config, ArborError::Config(_)));

        let permission = ArborError::from(PermissionError::Unavailable {
            reason: "timeout".to_string(),
        });
        assert!(matches!(permission, ArborError::Permission(_)));
    }
}
