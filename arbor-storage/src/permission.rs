//! Permission boundary

use arbor_core::{ArborError, ArborResult, BlockId, NodeId, StorageError, TreeId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Requested access level. `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// The entity a permission question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    Tree(TreeId),
    Block(TreeId, BlockId),
    Node(TreeId, NodeId),
}

impl PermissionScope {
    pub fn tree_id(&self) -> TreeId {
        match *self {
            Self::Tree(t) | Self::Block(t, _) | Self::Node(t, _) => t,
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(t) => write!(f, "tree {}", t),
            Self::Block(_, b) => write!(f, "block {}", b),
            Self::Node(_, n) => write!(f, "node {}", n),
        }
    }
}

/// Answers "may this user read/write this scope?".
///
/// An `Err` means the service could not answer; callers deny in that case.
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn check(&self, user: UserId, scope: PermissionScope, access: Access)
        -> ArborResult<bool>;
}

#[derive(Debug, Default)]
struct AclState {
    grants: HashMap<(TreeId, UserId), Access>,
    locked_blocks: HashSet<(UserId, BlockId)>,
    locked_nodes: HashSet<(UserId, NodeId)>,
}

/// Access-control list: per-tree grants plus per-entity write locks.
#[derive(Debug, Default)]
pub struct AclPermissions {
    state: RwLock<AclState>,
}

impl AclPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `access` on a whole tree. A later grant replaces an earlier one.
    pub fn grant(&self, tree_id: TreeId, user: UserId, access: Access) {
        if let Ok(mut state) = self.state.write() {
            state.grants.insert((tree_id, user), access);
        }
    }

    /// Deny writes to one block for `user`, regardless of tree grants.
    pub fn lock_block(&self, user: UserId, block_id: BlockId) {
        if let Ok(mut state) = self.state.write() {
            state.locked_blocks.insert((user, block_id));
        }
    }

    /// Deny writes to one node for `user`, regardless of tree grants.
    pub fn lock_node(&self, user: UserId, node_id: NodeId) {
        if let Ok(mut state) = self.state.write() {
            state.locked_nodes.insert((user, node_id));
        }
    }
}

#[async_trait]
impl PermissionService for AclPermissions {
    async fn check(
        &self,
        user: UserId,
        scope: PermissionScope,
        access: Access,
    ) -> ArborResult<bool> {
        let state = self
            .state
            .read()
            .map_err(|_| ArborError::Storage(StorageError::LockPoisoned))?;

        let granted = state
            .grants
            .get(&(scope.tree_id(), user))
            .is_some_and(|g| *g >= access);
        if !granted {
            return Ok(false);
        }
        if access == Access::Read {
            return Ok(true);
        }
        Ok(match scope {
            PermissionScope::Tree(_) => true,
            PermissionScope::Block(_, b) => !state.locked_blocks.contains(&(user, b)),
            PermissionScope::Node(_, n) => !state.locked_nodes.contains(&(user, n)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::EntityIdType;

    #[tokio::test]
    async fn test_write_implies_read() {
        let acl = AclPermissions::new();
        let (tree, user) = (TreeId::now_v7(), UserId::now_v7());
        acl.grant(tree, user, Access::Write);
        assert!(acl.check(user, PermissionScope::Tree(tree), Access::Read).await.unwrap());
        assert!(acl.check(user, PermissionScope::Tree(tree), Access::Write).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_grant_does_not_allow_write() {
        let acl = AclPermissions::new();
        let (tree, user) = (TreeId::now_v7(), UserId::now_v7());
        acl.grant(tree, user, Access::Read);
        assert!(!acl.check(user, PermissionScope::Tree(tree), Access::Write).await.unwrap());
        let stranger = UserId::now_v7();
        assert!(!acl.check(stranger, PermissionScope::Tree(tree), Access::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_node_lock_is_finer_than_tree_grant() {
        let acl = AclPermissions::new();
        let (tree, user, node) = (TreeId::now_v7(), UserId::now_v7(), NodeId::now_v7());
        acl.grant(tree, user, Access::Write);
        acl.lock_node(user, node);
        assert!(!acl.check(user, PermissionScope::Node(tree, node), Access::Write).await.unwrap());
        assert!(acl.check(user, PermissionScope::Node(tree, node), Access::Read).await.unwrap());
        let other = NodeId::now_v7();
        assert!(acl.check(user, PermissionScope::Node(tree, other), Access::Write).await.unwrap());
    }
}
