//! Node classification.
//!
//! Pure functions mapping a node's labels and conditions to its readiness
//! and provision states. All provisioning progress lives in the labels and
//! taints defined here; there is no other persisted state.

use crate::error::ProvisionError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use tracing::warn;

/// Label recording provisioning progress on the node object
pub const PROVISION_LABEL: &str = "provision";
/// `provision` value while a workflow is (or was, before a crash) active
pub const PROVISION_RUNNING: &str = "running";
/// `provision` value once the workflow gave up on the node
pub const PROVISION_FAILED: &str = "failed";
/// `provision` value once both stages completed
pub const PROVISION_SUCCESSFUL: &str = "successful";

/// Label counting provision attempts, bounding crash-retry loops
pub const ATTEMPT_LABEL: &str = "provision-attempt";

/// Taint applied to failed nodes so schedulers avoid them
pub const FAILED_TAINT_KEY: &str = "provision-failed";
/// Effect of the failure taint
pub const FAILED_TAINT_EFFECT: &str = "NoSchedule";

const CONDITION_READY: &str = "Ready";
const CONDITION_DISK_PRESSURE: &str = "DiskPressure";
const CONDITION_NETWORK_UNAVAILABLE: &str = "NetworkUnavailable";

/// Derived readiness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessState {
    /// Whether the node can currently accept workloads
    pub ready: bool,
    /// Most recent transition among the contributing conditions
    #[allow(dead_code)] // Reserved for future use
    pub last_transition: Option<DateTime<Utc>>,
}

/// Provisioning state derived from the `provision` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    /// No `provision` label; the node has never been provisioned
    Absent,
    /// A workflow marked the node and has not finished (possibly crashed)
    Running,
    /// Provisioning gave up; manual intervention required
    Failed,
    /// Provisioning completed
    Successful,
}

impl ProvisionState {
    /// Derive the provision state from the node's labels.
    pub fn of(node: &Node) -> Self {
        let value = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(PROVISION_LABEL));
        match value.map(String::as_str) {
            None => ProvisionState::Absent,
            Some(PROVISION_RUNNING) => ProvisionState::Running,
            Some(PROVISION_FAILED) => ProvisionState::Failed,
            Some(PROVISION_SUCCESSFUL) => ProvisionState::Successful,
            Some(other) => {
                // Never assume we produced the value we observe.
                warn!(
                    "Node {} carries unrecognized provision label value {:?}, treating as unprovisioned",
                    node.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    other
                );
                ProvisionState::Absent
            }
        }
    }

    /// Whether this state means the node should be (re)provisioned.
    pub fn needs_provisioning(self) -> bool {
        matches!(self, ProvisionState::Absent | ProvisionState::Running)
    }
}

/// Compute the node's readiness from its condition records.
///
/// A node can be ready only if its `Ready` condition is not False/Unknown
/// and neither `DiskPressure` nor `NetworkUnavailable` is True. A missing
/// `Ready` condition is a diagnostic, not a panic; callers that only need
/// a boolean should use [`is_ready_and_schedulable`], which fails closed.
pub fn readiness_state(node: &Node) -> Result<ReadinessState, ProvisionError> {
    let mut can_be_ready = true;
    let mut ready_found = false;
    let mut last_transition: Option<DateTime<Utc>> = None;

    let conditions = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .unwrap_or(&[]);

    for cond in conditions {
        match cond.type_.as_str() {
            CONDITION_READY => {
                ready_found = true;
                if cond.status == "False" || cond.status == "Unknown" {
                    can_be_ready = false;
                }
                bump_transition(&mut last_transition, cond.last_transition_time.as_ref());
            }
            CONDITION_DISK_PRESSURE | CONDITION_NETWORK_UNAVAILABLE => {
                if cond.status == "True" {
                    can_be_ready = false;
                }
                bump_transition(&mut last_transition, cond.last_transition_time.as_ref());
            }
            _ => {}
        }
    }

    if !ready_found {
        return Err(ProvisionError::configuration(format!(
            "readiness information not found for node {}",
            node.metadata.name.as_deref().unwrap_or("<unnamed>")
        )));
    }
    Ok(ReadinessState {
        ready: can_be_ready,
        last_transition,
    })
}

fn bump_transition(
    latest: &mut Option<DateTime<Utc>>,
    observed: Option<&k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
) {
    if let Some(time) = observed {
        if latest.is_none_or(|current| current < time.0) {
            *latest = Some(time.0);
        }
    }
}

/// True if the node is ready and not marked unschedulable.
///
/// Nodes with missing readiness data classify as not ready.
pub fn is_ready_and_schedulable(node: &Node) -> bool {
    let ready = match readiness_state(node) {
        Ok(state) => state.ready,
        Err(_) => false,
    };
    if !ready {
        return false;
    }
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false);
    !unschedulable
}

/// True if the node completed provisioning successfully.
pub fn is_provisioned_successfully(node: &Node) -> bool {
    ProvisionState::of(node) == ProvisionState::Successful
}

/// True if the node should be picked up by the provision loop.
pub fn needs_provisioning(node: &Node) -> bool {
    ProvisionState::of(node).needs_provisioning()
}

/// Number of provision attempts recorded on the node.
///
/// Unparseable values count as zero; the next workflow run rewrites the
/// label with a valid count.
pub fn attempt_count(node: &Node) -> u32 {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ATTEMPT_LABEL))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
