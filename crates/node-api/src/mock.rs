//! Mock NodeApi for unit testing
//!
//! This module provides a mock implementation of the NodeApi trait that can
//! be used in unit tests without requiring a running cluster.

use crate::error::NodeApiError;
use crate::event::NodeEvent;
use crate::node_api_trait::NodeApi;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Node, Taint};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

type WatchSender = mpsc::UnboundedSender<Result<NodeEvent, NodeApiError>>;

struct MockState {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<WatchSender>,
    // Scripted failures for test setup
    list_errors: VecDeque<NodeApiError>,
    patch_errors: VecDeque<NodeApiError>,
    conflict_budget: u32,
    // Counter for fabricated resource versions
    next_version: u64,
}

/// Mock NodeApi for testing
///
/// This mock stores nodes in memory and can be configured to return
/// specific failures for testing different scenarios. Patches mutate the
/// store, bump the node's resource version, and are broadcast to any open
/// watch streams.
#[derive(Clone)]
pub struct MockNodeApi {
    inner: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockNodeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNodeApi").finish()
    }
}

impl Default for MockNodeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNodeApi {
    /// Create a new mock with an empty inventory
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                nodes: BTreeMap::new(),
                watchers: Vec::new(),
                list_errors: VecDeque::new(),
                patch_errors: VecDeque::new(),
                conflict_budget: 0,
                next_version: 1,
            })),
        }
    }

    /// Add or replace a node in the inventory (for test setup)
    ///
    /// Assigns a resource version if the node has none and notifies open
    /// watch streams.
    pub fn add_node(&self, mut node: Node) {
        let mut state = self.inner.lock().unwrap();
        if node.metadata.resource_version.is_none() {
            node.metadata.resource_version = Some(state.next_version.to_string());
            state.next_version += 1;
        }
        let name = node.metadata.name.clone().unwrap_or_default();
        state.nodes.insert(name, node.clone());
        broadcast(&mut state, NodeEvent::Applied(node));
    }

    /// Remove a node from the inventory (for test setup)
    pub fn remove_node(&self, name: &str) {
        let mut state = self.inner.lock().unwrap();
        if let Some(node) = state.nodes.remove(name) {
            broadcast(&mut state, NodeEvent::Deleted(node));
        }
    }

    /// Current copy of a node, if present
    pub fn node(&self, name: &str) -> Option<Node> {
        self.inner.lock().unwrap().nodes.get(name).cloned()
    }

    /// Labels currently on a node (empty map if absent)
    pub fn labels_of(&self, name: &str) -> BTreeMap<String, String> {
        self.node(name)
            .and_then(|n| n.metadata.labels)
            .unwrap_or_default()
    }

    /// Taints currently on a node (empty if absent)
    pub fn taints_of(&self, name: &str) -> Vec<Taint> {
        self.node(name)
            .and_then(|n| n.spec)
            .and_then(|s| s.taints)
            .unwrap_or_default()
    }

    /// Script the next `list_nodes` call to fail with the given error
    pub fn fail_next_list(&self, err: NodeApiError) {
        self.inner.lock().unwrap().list_errors.push_back(err);
    }

    /// Script the next `n` patches to fail with a version conflict
    pub fn fail_next_patches_with_conflict(&self, n: u32) {
        self.inner.lock().unwrap().conflict_budget = n;
    }

    /// Script the next patch to fail with the given error
    pub fn fail_next_patch(&self, err: NodeApiError) {
        self.inner.lock().unwrap().patch_errors.push_back(err);
    }

    fn check_patch_preconditions(
        state: &mut MockState,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), NodeApiError> {
        if state.conflict_budget > 0 {
            state.conflict_budget -= 1;
            return Err(NodeApiError::Conflict {
                name: name.to_string(),
                message: "scripted conflict".to_string(),
            });
        }
        if let Some(err) = state.patch_errors.pop_front() {
            return Err(err);
        }
        let node = state
            .nodes
            .get(name)
            .ok_or_else(|| NodeApiError::NotFound(name.to_string()))?;
        if let Some(rv) = resource_version {
            if node.metadata.resource_version.as_deref() != Some(rv) {
                return Err(NodeApiError::Conflict {
                    name: name.to_string(),
                    message: format!(
                        "resource version {} is stale (current {:?})",
                        rv, node.metadata.resource_version
                    ),
                });
            }
        }
        Ok(())
    }
}

fn broadcast(state: &mut MockState, event: NodeEvent) {
    state
        .watchers
        .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
}

fn bump_version(state: &mut MockState, name: &str) -> Node {
    let version = state.next_version.to_string();
    state.next_version += 1;
    let node = state.nodes.get_mut(name).unwrap();
    node.metadata.resource_version = Some(version);
    node.clone()
}

#[async_trait::async_trait]
impl NodeApi for MockNodeApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, NodeApiError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(err) = state.list_errors.pop_front() {
            return Err(err);
        }
        Ok(state.nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, NodeApiError> {
        self.node(name)
            .ok_or_else(|| NodeApiError::NotFound(name.to_string()))
    }

    fn watch_nodes(&self) -> BoxStream<'static, Result<NodeEvent, NodeApiError>> {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.inner.lock().unwrap();
        // Mirror the real watcher: a fresh stream opens with a full snapshot.
        let snapshot = state.nodes.values().cloned().collect();
        let _ = tx.unbounded_send(Ok(NodeEvent::Resync(snapshot)));
        state.watchers.push(tx);
        Box::pin(rx)
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<Node, NodeApiError> {
        let mut state = self.inner.lock().unwrap();
        Self::check_patch_preconditions(&mut state, name, resource_version)?;

        let node = state.nodes.get_mut(name).unwrap();
        let current = node.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in labels {
            match value {
                Some(v) => {
                    current.insert(key.clone(), v.clone());
                }
                None => {
                    current.remove(key);
                }
            }
        }
        let updated = bump_version(&mut state, name);
        broadcast(&mut state, NodeEvent::Applied(updated.clone()));
        Ok(updated)
    }

    async fn patch_node_taints(
        &self,
        name: &str,
        resource_version: Option<&str>,
        taints: &[Taint],
    ) -> Result<Node, NodeApiError> {
        let mut state = self.inner.lock().unwrap();
        Self::check_patch_preconditions(&mut state, name, resource_version)?;

        let node = state.nodes.get_mut(name).unwrap();
        let spec = node.spec.get_or_insert_with(Default::default);
        spec.taints = if taints.is_empty() {
            None
        } else {
            Some(taints.to_vec())
        };
        let updated = bump_version(&mut state, name);
        broadcast(&mut state, NodeEvent::Applied(updated.clone()));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn patch_labels_applies_and_removes_keys() {
        let api = MockNodeApi::new();
        api.add_node(node("n1"));

        let mut labels = BTreeMap::new();
        labels.insert("provision".to_string(), Some("running".to_string()));
        api.patch_node_labels("n1", None, &labels).await.unwrap();
        assert_eq!(
            api.labels_of("n1").get("provision").map(String::as_str),
            Some("running")
        );

        labels.insert("provision".to_string(), None);
        api.patch_node_labels("n1", None, &labels).await.unwrap();
        assert!(api.labels_of("n1").get("provision").is_none());
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let api = MockNodeApi::new();
        api.add_node(node("n1"));
        let rv = api.node("n1").unwrap().metadata.resource_version.unwrap();

        // First patch succeeds and bumps the version
        let labels = BTreeMap::from([("a".to_string(), Some("1".to_string()))]);
        api.patch_node_labels("n1", Some(&rv), &labels).await.unwrap();

        // Reusing the old version now conflicts
        let err = api
            .patch_node_labels("n1", Some(&rv), &labels)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn watch_opens_with_resync_and_sees_patches() {
        use futures::StreamExt;

        let api = MockNodeApi::new();
        api.add_node(node("n1"));

        let mut stream = api.watch_nodes();
        match stream.next().await.unwrap().unwrap() {
            NodeEvent::Resync(nodes) => assert_eq!(nodes.len(), 1),
            other => panic!("expected resync, got {:?}", other),
        }

        let labels = BTreeMap::from([("a".to_string(), Some("1".to_string()))]);
        api.patch_node_labels("n1", None, &labels).await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            NodeEvent::Applied(n) => assert_eq!(n.metadata.name.as_deref(), Some("n1")),
            other => panic!("expected applied, got {:?}", other),
        }
    }
}
