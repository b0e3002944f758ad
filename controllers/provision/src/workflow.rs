//! Node provision workflow.
//!
//! Advances a single node through the two provisioning stages:
//!
//! 1. **Install**: host-level setup through the [`Installer`] collaborator.
//! 2. **Label**: apply the operator's target label and record success.
//!
//! The node's `provision` label is the only durable record of progress.
//! The workflow patches it to `running` before doing anything else, so a
//! crash at any later point leaves a marker the next cycle recognizes and
//! retries from stage 1. Retries are bounded by an attempt counter carried
//! in a second label; past the bound the node moves to `failed` and gets a
//! `NoSchedule` taint. A failed node is never self-healed.

use crate::classify::{
    self, ATTEMPT_LABEL, FAILED_TAINT_EFFECT, FAILED_TAINT_KEY, PROVISION_FAILED, PROVISION_LABEL,
    PROVISION_RUNNING, PROVISION_SUCCESSFUL,
};
use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use installer::{default_disposition, InstallDisposition, InstallError, Installer};
use k8s_openapi::api::core::v1::{Node, Taint};
use node_api::NodeApi;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Classifies opaque install errors as retry-vs-fatal
pub type InstallClassifier = Arc<dyn Fn(&InstallError) -> InstallDisposition + Send + Sync>;

/// Result of one workflow run over one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// Both stages completed; the node carries the target label
    Provisioned,
    /// The node was moved to the failed state (label + taint)
    Failed {
        /// Why the node was given up on
        reason: String,
    },
}

/// Drives the provisioning stages for individual nodes
pub struct ProvisionWorkflow<A, I> {
    api: Arc<A>,
    installer: Arc<I>,
    config: Arc<ProvisionConfig>,
    classify_install_error: InstallClassifier,
}

impl<A, I> std::fmt::Debug for ProvisionWorkflow<A, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionWorkflow").finish()
    }
}

impl<A, I> ProvisionWorkflow<A, I>
where
    A: NodeApi,
    I: Installer,
{
    /// Create a workflow with the default install-error classifier.
    pub fn new(api: Arc<A>, installer: Arc<I>, config: Arc<ProvisionConfig>) -> Self {
        Self {
            api,
            installer,
            config,
            classify_install_error: Arc::new(default_disposition),
        }
    }

    /// Replace the install-error classifier.
    #[must_use]
    #[allow(dead_code)] // Operator hook, exercised in tests
    pub fn with_install_classifier(mut self, classifier: InstallClassifier) -> Self {
        self.classify_install_error = classifier;
        self
    }

    /// Run the provisioning stages for one node.
    ///
    /// Safe to re-enter with any observed label state: entry always starts
    /// at stage 1, and every patch re-reads the node first.
    pub async fn provision_node(&self, node: &Node) -> Result<WorkflowOutcome, ProvisionError> {
        let name = node.metadata.name.as_deref().ok_or_else(|| {
            ProvisionError::internal("provision workflow dispatched a node without a name")
        })?;

        let attempts = classify::attempt_count(node);
        if attempts >= self.config.max_attempts {
            let reason = format!(
                "gave up after {} provision attempts",
                self.config.max_attempts
            );
            self.mark_failed(name, &reason).await?;
            return Ok(WorkflowOutcome::Failed { reason });
        }

        // Durable marker: a crash after this point leaves provision=running,
        // which the next cycle treats as "needs provisioning" again.
        let marker = BTreeMap::from([
            (
                PROVISION_LABEL.to_string(),
                Some(PROVISION_RUNNING.to_string()),
            ),
            (
                ATTEMPT_LABEL.to_string(),
                Some((attempts + 1).to_string()),
            ),
        ]);
        self.patch_labels_with_retry(name, marker)
            .await
            .map_err(|e| e.context(format!("marking node {} as provisioning", name)))?;
        debug!(
            "Node {} entering install stage (attempt {}/{})",
            name,
            attempts + 1,
            self.config.max_attempts
        );

        if let Some(reason) = self.install_stage(node, name).await {
            self.mark_failed(name, &reason).await?;
            return Ok(WorkflowOutcome::Failed { reason });
        }

        if let Some(reason) = self.label_stage(name).await? {
            self.mark_failed(name, &reason).await?;
            return Ok(WorkflowOutcome::Failed { reason });
        }

        info!("Node {} provisioned", name);
        Ok(WorkflowOutcome::Provisioned)
    }

    /// Stage 1: run the installer, retrying transient failures within the
    /// configured budget. Returns the failure reason when the stage is lost.
    async fn install_stage(&self, node: &Node, name: &str) -> Option<String> {
        let mut retries_left = self.config.install_retries;
        loop {
            match self.installer.run_install(node).await {
                Ok(()) => return None,
                Err(err) => match (self.classify_install_error)(&err) {
                    InstallDisposition::Transient if retries_left > 0 => {
                        retries_left -= 1;
                        warn!(
                            "Transient install failure on node {} ({} retries left): {}",
                            name, retries_left, err
                        );
                    }
                    InstallDisposition::Transient => {
                        error!("Install retries exhausted for node {}: {}", name, err);
                        return Some(format!("install retries exhausted: {}", err));
                    }
                    InstallDisposition::Fatal => {
                        error!("Fatal install failure on node {}: {}", name, err);
                        return Some(format!("install failed: {}", err));
                    }
                },
            }
        }
    }

    /// Stage 2: clear any failure taint from an earlier attempt, then apply
    /// the target label and record success in one patch.
    ///
    /// Returns `Ok(Some(reason))` when the stage is lost to a recoverable
    /// API failure (the node moves to failed); hard errors propagate.
    async fn label_stage(&self, name: &str) -> Result<Option<String>, ProvisionError> {
        if let Err(e) = self.remove_failure_taint(name).await {
            if !e.is_recoverable() {
                return Err(e);
            }
            warn!("Could not clear failure taint on node {}: {}", name, e);
            return Ok(Some(format!("clearing failure taint: {}", e)));
        }

        let labels = BTreeMap::from([
            (
                self.config.target_label_key.clone(),
                Some(self.config.target_label_value.clone()),
            ),
            (
                PROVISION_LABEL.to_string(),
                Some(PROVISION_SUCCESSFUL.to_string()),
            ),
            (ATTEMPT_LABEL.to_string(), None),
        ]);
        match self.patch_labels_with_retry(name, labels).await {
            Ok(()) => Ok(None),
            Err(e) if e.is_recoverable() => {
                warn!("Labeling node {} failed: {}", name, e);
                Ok(Some(format!("applying target label: {}", e)))
            }
            Err(e) => Err(e),
        }
    }

    /// Terminal failure transition: record `provision=failed` and taint the
    /// node so schedulers avoid it until an operator intervenes.
    async fn mark_failed(&self, name: &str, reason: &str) -> Result<(), ProvisionError> {
        error!("Provisioning failed for node {}: {}", name, reason);
        let labels = BTreeMap::from([(
            PROVISION_LABEL.to_string(),
            Some(PROVISION_FAILED.to_string()),
        )]);
        self.patch_labels_with_retry(name, labels)
            .await
            .map_err(|e| e.context(format!("marking node {} failed", name)))?;
        self.add_failure_taint(name)
            .await
            .map_err(|e| e.context(format!("tainting failed node {}", name)))
    }

    async fn add_failure_taint(&self, name: &str) -> Result<(), ProvisionError> {
        self.patch_taints_with_retry(name, |mut taints| {
            if !taints.iter().any(|t| t.key == FAILED_TAINT_KEY) {
                taints.push(failure_taint());
            }
            taints
        })
        .await
    }

    async fn remove_failure_taint(&self, name: &str) -> Result<(), ProvisionError> {
        self.patch_taints_with_retry(name, |taints| {
            taints
                .into_iter()
                .filter(|t| t.key != FAILED_TAINT_KEY)
                .collect()
        })
        .await
    }

    /// Apply a label patch conditionally on the node's current version,
    /// re-reading and retrying on conflict up to the configured bound.
    async fn patch_labels_with_retry(
        &self,
        name: &str,
        labels: BTreeMap<String, Option<String>>,
    ) -> Result<(), ProvisionError> {
        let mut conflicts = 0;
        loop {
            let node = self.api.get_node(name).await?;
            let version = node.metadata.resource_version;
            match self
                .api
                .patch_node_labels(name, version.as_deref(), &labels)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && conflicts < self.config.patch_conflict_retries => {
                    conflicts += 1;
                    debug!(
                        "Label patch conflict on node {} (retry {}): {}",
                        name, conflicts, e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Same discipline as label patches, for the taint list. `edit` maps
    /// the observed taints to the desired set; no-op edits skip the patch.
    async fn patch_taints_with_retry(
        &self,
        name: &str,
        edit: impl Fn(Vec<Taint>) -> Vec<Taint>,
    ) -> Result<(), ProvisionError> {
        let mut conflicts = 0;
        loop {
            let node = self.api.get_node(name).await?;
            let current = node
                .spec
                .as_ref()
                .and_then(|spec| spec.taints.clone())
                .unwrap_or_default();
            let desired = edit(current.clone());
            if desired == current {
                return Ok(());
            }
            let version = node.metadata.resource_version;
            match self
                .api
                .patch_node_taints(name, version.as_deref(), &desired)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && conflicts < self.config.patch_conflict_retries => {
                    conflicts += 1;
                    debug!(
                        "Taint patch conflict on node {} (retry {}): {}",
                        name, conflicts, e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn failure_taint() -> Taint {
    Taint {
        key: FAILED_TAINT_KEY.to_string(),
        value: Some("true".to_string()),
        effect: FAILED_TAINT_EFFECT.to_string(),
        time_added: None,
    }
}
