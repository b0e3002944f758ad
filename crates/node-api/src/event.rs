//! Watch stream events

use k8s_openapi::api::core::v1::Node;

/// A change to the cluster's node inventory, as seen by a watch stream.
///
/// `Resync` replaces the consumer's entire view; it is emitted once after
/// the initial LIST completes and again whenever the underlying watch has
/// to re-list (e.g. after falling too far behind the API server).
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node was added or updated
    Applied(Node),
    /// A node was removed from the cluster
    Deleted(Node),
    /// Full snapshot; replaces all previously seen state
    Resync(Vec<Node>),
}
