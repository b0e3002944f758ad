//! Provision Controller
//!
//! Provisions newly joined Kubernetes nodes in two stages:
//! - Install: host-level setup through ansible-playbook
//! - Label: apply the operator's target label so workload schedulers can
//!   place services on the node
//!
//! Progress is recorded exclusively in labels and taints on the node
//! objects (`provision` = running/failed/successful, a `NoSchedule` taint
//! on failure), so the controller resumes safely after a restart.

mod backoff;
mod classify;
mod config;
mod controller;
mod error;
mod filter;
mod listers;
mod workflow;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod workflow_test;

use crate::config::ProvisionConfig;
use crate::controller::ProvisionController;
use anyhow::{Context, Result};
use installer::AnsiblePlaybookInstaller;
use node_api::KubeNodeApi;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Provision Controller");

    // Configuration errors here abort startup; nothing below runs with a
    // half-validated config.
    let config = ProvisionConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    info!("Configuration:");
    info!("  Period: {:?}", config.period());
    info!("  Bulk limit: {}", config.bulk_limit);
    info!(
        "  Target label: {}={}",
        config.target_label_key, config.target_label_value
    );
    info!("  Ignored label keys: {:?}", config.ignored_labels.keys());
    info!("  Playbook: {:?}", config.playbook_path);

    let client = kube::Client::try_default()
        .await
        .context("building Kubernetes client")?;
    let api = Arc::new(KubeNodeApi::new(client));
    let installer = Arc::new(AnsiblePlaybookInstaller::new(
        config.playbook_path.clone(),
        config.inventory_path.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let controller = ProvisionController::new(api, installer, config, shutdown_rx.clone())
        .await
        .context("initializing provision controller")?;
    info!(
        "Inventory populated: {} node(s), {} awaiting provisioning",
        controller.listers().all_nodes().list().len(),
        controller.listers().unprovisioned_nodes().list().len()
    );
    controller.run(shutdown_rx).await?;

    Ok(())
}
