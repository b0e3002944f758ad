//! Kube-backed node API client
//!
//! Implements [`NodeApi`] over `kube::Api<Node>` and `kube_runtime::watcher`.

use crate::error::NodeApiError;
use crate::event::NodeEvent;
use crate::node_api_trait::NodeApi;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Taint};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use std::collections::BTreeMap;
use tracing::debug;

/// Node API client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeNodeApi {
    api: Api<Node>,
}

impl std::fmt::Debug for KubeNodeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeApi").finish()
    }
}

impl KubeNodeApi {
    /// Create a node API client from a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    /// Map kube errors to the caller-facing taxonomy.
    ///
    /// 409 means the conditional patch lost an optimistic-concurrency race;
    /// 404 means the node is gone. Everything else passes through.
    fn classify(name: &str, err: kube::Error) -> NodeApiError {
        match err {
            kube::Error::Api(ref response) if response.code == 409 => NodeApiError::Conflict {
                name: name.to_string(),
                message: response.message.clone(),
            },
            kube::Error::Api(ref response) if response.code == 404 => {
                NodeApiError::NotFound(name.to_string())
            }
            other => NodeApiError::Kube(other),
        }
    }
}

#[async_trait::async_trait]
impl NodeApi for KubeNodeApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, NodeApiError> {
        let nodes = self.api.list(&ListParams::default()).await?;
        Ok(nodes.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, NodeApiError> {
        self.api
            .get(name)
            .await
            .map_err(|e| Self::classify(name, e))
    }

    fn watch_nodes(&self) -> BoxStream<'static, Result<NodeEvent, NodeApiError>> {
        // The watcher emits Init/InitApply/InitDone around each (re)list.
        // Buffer the InitApply pages and emit them as one Resync so
        // consumers can atomically replace their view.
        let stream = watcher(self.api.clone(), watcher::Config::default())
            .scan(Vec::new(), |buffer: &mut Vec<Node>, event| {
                let out = match event {
                    Ok(Event::Init) => {
                        buffer.clear();
                        None
                    }
                    Ok(Event::InitApply(node)) => {
                        buffer.push(node);
                        None
                    }
                    Ok(Event::InitDone) => Some(Ok(NodeEvent::Resync(std::mem::take(buffer)))),
                    Ok(Event::Apply(node)) => Some(Ok(NodeEvent::Applied(node))),
                    Ok(Event::Delete(node)) => Some(Ok(NodeEvent::Deleted(node))),
                    Err(e) => Some(Err(NodeApiError::Watch(e.to_string()))),
                };
                futures::future::ready(Some(out))
            })
            .filter_map(futures::future::ready);
        Box::pin(stream)
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        resource_version: Option<&str>,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<Node, NodeApiError> {
        let mut metadata = serde_json::json!({ "labels": labels });
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = serde_json::json!(rv);
        }
        let patch = serde_json::json!({ "metadata": metadata });

        debug!("Patching labels on node {}: {:?}", name, labels);
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn patch_node_taints(
        &self,
        name: &str,
        resource_version: Option<&str>,
        taints: &[Taint],
    ) -> Result<Node, NodeApiError> {
        // Merge patch replaces the whole taints array.
        let mut patch = serde_json::json!({ "spec": { "taints": taints } });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }

        debug!("Patching taints on node {}: {} entries", name, taints.len());
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Self::classify(name, e))
    }
}
