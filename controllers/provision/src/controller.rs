//! Reconciliation loop.
//!
//! The periodic driver: snapshot the unprovisioned view, filter out
//! ignored nodes, truncate to the bulk limit, and run the provision
//! workflow for each survivor concurrently. Rounds never overlap: a round
//! runs to completion before the next tick is considered, and a tick that
//! comes due mid-round is skipped (or queued, configurable).
//!
//! Per-node failures are isolated; a cluster API failure skips the tick;
//! only internal errors terminate the loop.

use crate::config::ProvisionConfig;
use crate::error::{ErrorKind, ProvisionError};
use crate::filter::filter_out_ignored_nodes;
use crate::listers::ListerRegistry;
use crate::workflow::{ProvisionWorkflow, WorkflowOutcome};
use chrono::{DateTime, Utc};
use installer::Installer;
use k8s_openapi::api::core::v1::Node;
use node_api::NodeApi;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Aggregate outcome of one reconciliation round
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Nodes handed to the workflow this round
    pub dispatched: usize,
    /// Nodes that completed both stages
    pub provisioned: usize,
    /// Nodes moved to the failed state
    pub failed: usize,
    /// Workflows that did not complete (retried next round)
    pub errored: usize,
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dispatched {} node(s): {} provisioned, {} failed, {} errored",
            self.dispatched, self.provisioned, self.failed, self.errored
        )
    }
}

/// Periodic driver advancing unprovisioned nodes through the workflow
pub struct ProvisionController<A, I> {
    config: Arc<ProvisionConfig>,
    listers: ListerRegistry,
    workflow: Arc<ProvisionWorkflow<A, I>>,
    // Nodes currently inside a workflow; guards against double dispatch.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<A, I> std::fmt::Debug for ProvisionController<A, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionController").finish()
    }
}

impl<A, I> ProvisionController<A, I>
where
    A: NodeApi + 'static,
    I: Installer + 'static,
{
    /// Validate the configuration, populate the inventory views, and build
    /// the controller. Fails fast on bad configuration or an unreachable
    /// cluster API.
    pub async fn new(
        api: Arc<A>,
        installer: Arc<I>,
        config: ProvisionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ProvisionError> {
        config.validate()?;
        let config = Arc::new(config);
        let listers =
            ListerRegistry::new_with_default_listers(api.clone(), config.resync_period(), shutdown)
                .await?;
        let workflow = Arc::new(ProvisionWorkflow::new(api, installer, config.clone()));
        Ok(Self {
            config,
            listers,
            workflow,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// The inventory views backing this controller.
    pub fn listers(&self) -> &ListerRegistry {
        &self.listers
    }

    /// Run one reconciliation round.
    ///
    /// Returns the per-round summary; an `ApiCall` error means the round
    /// could not start and should simply be retried next tick.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<TickSummary, ProvisionError> {
        debug!(
            "Provision round starting at {} ({} nodes, {} ready, {} provisioned)",
            now,
            self.listers.all_nodes().list().len(),
            self.listers.ready_nodes().list().len(),
            self.listers.provisioned_nodes().list().len()
        );

        let unprovisioned = self.listers.unprovisioned_nodes().list();
        let eligible = filter_out_ignored_nodes(&self.config.ignored_labels, unprovisioned);
        let candidates = self.select_candidates(eligible);

        let mut summary = TickSummary {
            dispatched: candidates.len(),
            ..TickSummary::default()
        };
        if candidates.is_empty() {
            return Ok(summary);
        }

        let dispatched: Vec<String> = candidates
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();
        info!(
            "Provisioning {} node(s): {}",
            dispatched.len(),
            dispatched.join(", ")
        );

        let mut join_set = JoinSet::new();
        for node in candidates {
            let workflow = self.workflow.clone();
            let name = node.metadata.name.clone().unwrap_or_default();
            join_set.spawn(async move {
                let result = workflow.provision_node(&node).await;
                (name, result)
            });
        }

        let mut fatal: Option<ProvisionError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(WorkflowOutcome::Provisioned))) => {
                    summary.provisioned += 1;
                    self.clear_in_flight(&name);
                }
                Ok((name, Ok(WorkflowOutcome::Failed { reason }))) => {
                    warn!("Node {} moved to failed state: {}", name, reason);
                    summary.failed += 1;
                    self.clear_in_flight(&name);
                }
                Ok((name, Err(e))) => {
                    summary.errored += 1;
                    self.clear_in_flight(&name);
                    if e.kind() == ErrorKind::Internal {
                        fatal.get_or_insert(e);
                    } else {
                        warn!(
                            "Provisioning node {} did not complete, retrying next round: {}",
                            name, e
                        );
                    }
                }
                Err(join_err) => {
                    summary.errored += 1;
                    fatal.get_or_insert_with(|| {
                        ProvisionError::internal(format!(
                            "provision workflow panicked: {}",
                            join_err
                        ))
                    });
                }
            }
        }

        // All workflows have joined; nothing dispatched this round may
        // linger in the set (a panicked task never cleared its entry).
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            for name in &dispatched {
                in_flight.remove(name);
            }
        }

        match fatal {
            Some(e) => Err(e.context("provision round")),
            None => Ok(summary),
        }
    }

    /// Order eligible nodes deterministically (oldest joined first, name as
    /// tiebreak), drop nodes already mid-workflow, truncate to the bulk
    /// limit, and mark the survivors in-flight.
    fn select_candidates(&self, mut nodes: Vec<Node>) -> Vec<Node> {
        nodes.sort_by(|a, b| {
            let key_a = (
                a.metadata.creation_timestamp.as_ref().map(|t| t.0),
                a.metadata.name.as_deref(),
            );
            let key_b = (
                b.metadata.creation_timestamp.as_ref().map(|t| t.0),
                b.metadata.name.as_deref(),
            );
            key_a.cmp(&key_b)
        });

        let mut in_flight = self.in_flight.lock().unwrap();
        let mut candidates = Vec::new();
        for node in nodes {
            if candidates.len() >= self.config.bulk_limit {
                break;
            }
            let Some(name) = node.metadata.name.clone() else {
                continue;
            };
            if in_flight.insert(name) {
                candidates.push(node);
            }
        }
        candidates
    }

    fn clear_in_flight(&self, name: &str) {
        self.in_flight.lock().unwrap().remove(name);
    }

    /// Drive [`Self::run_once`] on the configured period until shutdown.
    ///
    /// A round runs to completion before the shutdown signal or the next
    /// tick is looked at, so cancellation never interrupts a workflow
    /// mid-stage. Only internal errors propagate; everything else is
    /// logged and the loop keeps going.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProvisionError> {
        let mut ticker = tokio::time::interval(self.config.period());
        ticker.set_missed_tick_behavior(if self.config.queue_missed_ticks {
            MissedTickBehavior::Delay
        } else {
            MissedTickBehavior::Skip
        });
        info!(
            "Provision loop started (period {:?}, bulk limit {})",
            self.config.period(),
            self.config.bulk_limit
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, provision loop stopping");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(summary) if summary.dispatched > 0 => info!("Provision round done: {}", summary),
                        Ok(_) => debug!("Provision round done: nothing to do"),
                        Err(e) if e.kind() == ErrorKind::Internal => {
                            error!("Provision loop stopping: {}", e);
                            return Err(e);
                        }
                        // ApiCall errors and runtime configuration problems
                        // are operator-recoverable; skip this tick.
                        Err(e) => warn!("Skipping provision round: {}", e),
                    }
                }
            }
        }
    }
}
