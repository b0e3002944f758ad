//! Cached node inventory views.
//!
//! Each lister owns a background task that mirrors the cluster's node
//! inventory from a watch stream into a local store and publishes read-only
//! snapshots. Reads never block on an API round-trip; they may serve data
//! as stale as the watch's propagation delay. A periodic full re-list
//! guards against missed events.
//!
//! The registry bundles the four standard views: all nodes, ready nodes,
//! successfully provisioned nodes, and nodes still needing provisioning.

use crate::backoff::FibonacciBackoff;
use crate::classify;
use crate::error::ProvisionError;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use node_api::{NodeApi, NodeEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Predicate selecting the nodes a view exposes
pub type NodeFilter = fn(&Node) -> bool;

const WATCH_BACKOFF_MIN_SECS: u64 = 1;
const WATCH_BACKOFF_MAX_SECS: u64 = 30;

/// A non-blocking, filtered view over the cached node inventory
pub struct NodeLister {
    snapshot: watch::Receiver<Arc<Vec<Node>>>,
    filter: Option<NodeFilter>,
}

impl std::fmt::Debug for NodeLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLister")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl NodeLister {
    /// Build a lister and start its refresh task.
    ///
    /// Performs the initial LIST inline; failure here is the only
    /// caller-visible error. Once running, watch interruptions are retried
    /// internally (the view serves stale data rather than erroring) and
    /// the store is fully re-listed every `resync_period`.
    pub async fn new<A>(
        api: Arc<A>,
        filter: Option<NodeFilter>,
        resync_period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ProvisionError>
    where
        A: NodeApi + 'static,
    {
        let initial = api
            .list_nodes()
            .await
            .map_err(|e| ProvisionError::from(e).context("initial node inventory population"))?;

        let mut store = BTreeMap::new();
        rebuild(&mut store, initial);
        let (tx, rx) = watch::channel(snapshot_of(&store));
        tokio::spawn(refresh_loop(api, store, tx, resync_period, shutdown));

        Ok(Self {
            snapshot: rx,
            filter,
        })
    }

    /// Nodes currently matching this view's predicate.
    pub fn list(&self) -> Vec<Node> {
        let snapshot = self.snapshot.borrow().clone();
        match self.filter {
            Some(filter) => snapshot.iter().filter(|n| filter(n)).cloned().collect(),
            None => snapshot.as_ref().clone(),
        }
    }

    /// Look up a node by name, unfiltered.
    #[allow(dead_code)] // Utility method, may be useful in the future
    pub fn get(&self, name: &str) -> Option<Node> {
        self.snapshot
            .borrow()
            .iter()
            .find(|n| n.metadata.name.as_deref() == Some(name))
            .cloned()
    }
}

fn snapshot_of(store: &BTreeMap<String, Node>) -> Arc<Vec<Node>> {
    Arc::new(store.values().cloned().collect())
}

fn rebuild(store: &mut BTreeMap<String, Node>, nodes: Vec<Node>) {
    store.clear();
    for node in nodes {
        if let Some(name) = node.metadata.name.clone() {
            store.insert(name, node);
        }
    }
}

fn publish(tx: &watch::Sender<Arc<Vec<Node>>>, store: &BTreeMap<String, Node>) {
    let _ = tx.send(snapshot_of(store));
}

/// Owns the store: applies watch events, re-lists periodically, and
/// re-establishes a broken stream with Fibonacci backoff.
async fn refresh_loop<A>(
    api: Arc<A>,
    mut store: BTreeMap<String, Node>,
    tx: watch::Sender<Arc<Vec<Node>>>,
    resync_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    A: NodeApi + 'static,
{
    let mut backoff = FibonacciBackoff::new(WATCH_BACKOFF_MIN_SECS, WATCH_BACKOFF_MAX_SECS);
    let mut resync = tokio::time::interval(resync_period);
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first interval tick fires immediately; the initial LIST already
    // populated the store.
    resync.tick().await;

    loop {
        let mut stream = api.watch_nodes();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Node lister stopping");
                        return;
                    }
                }
                _ = resync.tick() => {
                    match api.list_nodes().await {
                        Ok(nodes) => {
                            rebuild(&mut store, nodes);
                            publish(&tx, &store);
                        }
                        Err(e) => warn!("Periodic node inventory resync failed: {}", e),
                    }
                }
                event = stream.next() => match event {
                    Some(Ok(NodeEvent::Applied(node))) => {
                        if let Some(name) = node.metadata.name.clone() {
                            store.insert(name, node);
                            publish(&tx, &store);
                        }
                    }
                    Some(Ok(NodeEvent::Deleted(node))) => {
                        if let Some(name) = node.metadata.name.as_deref() {
                            store.remove(name);
                            publish(&tx, &store);
                        }
                    }
                    Some(Ok(NodeEvent::Resync(nodes))) => {
                        rebuild(&mut store, nodes);
                        publish(&tx, &store);
                        backoff.reset();
                    }
                    Some(Err(e)) => {
                        warn!("Node watch failed, re-establishing: {}", e);
                        break;
                    }
                    None => {
                        warn!("Node watch stream ended, re-establishing");
                        break;
                    }
                }
            }
        }

        let delay = backoff.next_backoff();
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// The four standard inventory views
pub struct ListerRegistry {
    all_nodes: NodeLister,
    ready_nodes: NodeLister,
    provisioned_nodes: NodeLister,
    unprovisioned_nodes: NodeLister,
}

impl std::fmt::Debug for ListerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListerRegistry").finish()
    }
}

impl ListerRegistry {
    /// Build the registry with the default view predicates.
    pub async fn new_with_default_listers<A>(
        api: Arc<A>,
        resync_period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ProvisionError>
    where
        A: NodeApi + 'static,
    {
        let all_nodes =
            NodeLister::new(api.clone(), None, resync_period, shutdown.clone()).await?;
        let ready_nodes = NodeLister::new(
            api.clone(),
            Some(classify::is_ready_and_schedulable),
            resync_period,
            shutdown.clone(),
        )
        .await?;
        let provisioned_nodes = NodeLister::new(
            api.clone(),
            Some(classify::is_provisioned_successfully),
            resync_period,
            shutdown.clone(),
        )
        .await?;
        let unprovisioned_nodes = NodeLister::new(
            api,
            Some(classify::needs_provisioning),
            resync_period,
            shutdown,
        )
        .await?;

        Ok(Self {
            all_nodes,
            ready_nodes,
            provisioned_nodes,
            unprovisioned_nodes,
        })
    }

    /// View over every node in the cluster.
    pub fn all_nodes(&self) -> &NodeLister {
        &self.all_nodes
    }

    /// View over ready, schedulable nodes.
    pub fn ready_nodes(&self) -> &NodeLister {
        &self.ready_nodes
    }

    /// View over successfully provisioned nodes.
    pub fn provisioned_nodes(&self) -> &NodeLister {
        &self.provisioned_nodes
    }

    /// View over nodes needing (re)provisioning; the loop's work source.
    pub fn unprovisioned_nodes(&self) -> &NodeLister {
        &self.unprovisioned_nodes
    }
}
