//! Identity types for ARBOR entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash, used to skip re-indexing unchanged node text.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Common behaviour for strongly-typed entity identifiers.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Wrap a raw UUID.
    fn new(uuid: Uuid) -> Self;

    /// Borrow the raw UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh, timestamp-sortable (UUIDv7) identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Identifier of a tree (the top-level document).
    TreeId
);
define_entity_id!(
    /// Identifier of a block within a tree.
    BlockId
);
define_entity_id!(
    /// Identifier of a node within a block.
    NodeId
);
define_entity_id!(
    /// Identifier of a link attached to a node.
    LinkId
);
define_entity_id!(
    /// Identifier of an attachment on a node.
    AttachmentId
);
define_entity_id!(
    /// Identifier of an outgoing node dependency.
    DependencyId
);
define_entity_id!(
    /// Unique identifier of a planned operation.
    OperationId
);
define_entity_id!(
    /// Identifier of the acting user.
    UserId
);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_round_trips_through_display() {
        let id = NodeId::now_v7();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entity_id_parse_trims_whitespace() {
        let raw = Uuid::now_v7();
        let parsed: BlockId = format!("  {}\n", raw).parse().unwrap();
        assert_eq!(parsed.as_uuid(), raw);
    }

    #[test]
    fn test_entity_id_rejects_garbage() {
        assert!("first node".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_entity_id_serializes_transparently() {
        let raw = Uuid::nil();
        let json = serde_json::to_string(&TreeId::new(raw)).unwrap();
        assert_eq!(json, format!("\"{}\"", raw));
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(compute_content_hash(b"abc"), compute_content_hash(b"abc"));
        assert_ne!(compute_content_hash(b"abc"), compute_content_hash(b"abd"));
    }
}
