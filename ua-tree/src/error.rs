use thiserror::Error;

use crate::node::NodeId;

/// Result type alias for tree cache operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Centralized error enum for the tree cache and its node sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TreeError {
    /// The namespace source could not be reached or timed out.
    ///
    /// Transient: the same call may succeed later.
    #[error("Node source unavailable: {0}")]
    SourceUnavailable(String),

    /// The identity does not resolve in the namespace.
    #[error("Unknown node identity: {0}")]
    UnknownIdentity(NodeId),

    /// Internal consistency guard tripped (duplicate sibling identity,
    /// reference cycle, stale or foreign entry handle).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A background fetch for this node is already in flight.
    #[error("Fetch already in progress for {0}")]
    FetchInProgress(NodeId),

    /// A fetch result arrived after its entry was invalidated or dropped.
    #[error("Stale fetch result for {0} discarded")]
    StaleFetch(NodeId),
}

impl TreeError {
    /// Returns `true` when retrying the same call later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::FetchInProgress(_) | Self::StaleFetch(_)
        )
    }
}

impl From<tokio::time::error::Elapsed> for TreeError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::SourceUnavailable(format!("Request timed out: {err}"))
    }
}

/// Maps an error to a short, actionable hint for the message log.
pub fn friendly_hint(error: &TreeError) -> Option<&'static str> {
    match error {
        TreeError::SourceUnavailable(_) => Some("Source not reachable, press r to retry"),
        TreeError::UnknownIdentity(_) => Some("Node does not exist in this namespace"),
        TreeError::StaleFetch(_) => Some("Node was refreshed while loading"),
        TreeError::FetchInProgress(_) => Some("Node is still loading"),
        TreeError::InvariantViolation(_) => None,
    }
}
