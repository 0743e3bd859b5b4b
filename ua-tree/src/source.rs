use crate::error::TreeResult;
use crate::node::{NodeDescription, NodeId};
use async_trait::async_trait;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// Async trait for the remote namespace the cache mirrors.
///
/// This is the only seam between the cache and the outside world. Session
/// handling, security and wire encoding all live behind it; the cache treats
/// every call as a stateless round-trip.
#[cfg_attr(any(test, feature = "test-support"), automock)]
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Describe a single node.
    ///
    /// # Errors
    /// Returns [`TreeError::SourceUnavailable`](crate::TreeError::SourceUnavailable)
    /// if the namespace cannot be reached, or
    /// [`TreeError::UnknownIdentity`](crate::TreeError::UnknownIdentity) if it
    /// has no node with this identity.
    async fn describe(&self, node_id: &NodeId) -> TreeResult<NodeDescription>;

    /// Describe the hierarchical children of a node, in no particular order.
    ///
    /// # Errors
    /// Returns [`TreeError::SourceUnavailable`](crate::TreeError::SourceUnavailable)
    /// if the namespace cannot be reached.
    async fn get_children_descriptions(&self, node_id: &NodeId)
    -> TreeResult<Vec<NodeDescription>>;
}
