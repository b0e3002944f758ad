//! NodeApi trait for mocking
//!
//! This trait abstracts the node API to enable mocking in unit tests.
//! The kube-backed client implements this trait, and tests can use the
//! in-memory mock implementation.

use crate::error::NodeApiError;
use crate::event::NodeEvent;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Node, Taint};
use std::collections::BTreeMap;

/// Trait for node inventory and patch operations
///
/// This trait enables mocking of Kubernetes node API calls for unit testing.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NodeApi: Send + Sync {
    /// List all nodes in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>, NodeApiError>;

    /// Get a single node by name.
    async fn get_node(&self, name: &str) -> Result<Node, NodeApiError>;

    /// Open a watch stream over the node inventory.
    ///
    /// The stream begins with a `NodeEvent::Resync` carrying the initial
    /// inventory, then delivers `Applied`/`Deleted` events as they happen.
    /// Errors on the stream indicate the watch broke; the consumer decides
    /// whether to re-establish it.
    fn watch_nodes(&self) -> BoxStream<'static, Result<NodeEvent, NodeApiError>>;

    /// Patch node labels with a JSON merge patch.
    ///
    /// A `Some(value)` entry sets the label, a `None` entry removes it.
    /// When `resource_version` is given the patch is conditional: the API
    /// server rejects it with `NodeApiError::Conflict` if the node has
    /// moved on from that version.
    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<Node, NodeApiError>;

    /// Replace the node's taints with the given list.
    ///
    /// Merge-patch semantics replace the whole `spec.taints` array, so the
    /// caller must pass the complete desired set. Conditional on
    /// `resource_version` like [`NodeApi::patch_node_labels`].
    async fn patch_node_taints(
        &self,
        name: &str,
        resource_version: Option<&str>,
        taints: &[Taint],
    ) -> Result<Node, NodeApiError>;
}
