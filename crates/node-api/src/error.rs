//! Node API errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API about nodes
#[derive(Debug, Error)]
pub enum NodeApiError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Conditional patch rejected because the node changed underneath us
    #[error("conflict patching node {name}: {message}")]
    Conflict {
        /// Name of the node the patch targeted
        name: String,
        /// Server-side conflict detail
        message: String,
    },

    /// Node does not exist (or no longer exists)
    #[error("node not found: {0}")]
    NotFound(String),

    /// Watch stream failed
    #[error("watch stream error: {0}")]
    Watch(String),
}

impl NodeApiError {
    /// True when the error is an optimistic-concurrency conflict that the
    /// caller can resolve by re-reading the node and retrying the patch.
    pub fn is_conflict(&self) -> bool {
        matches!(self, NodeApiError::Conflict { .. })
    }

    /// True when the target node is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeApiError::NotFound(_))
    }
}
