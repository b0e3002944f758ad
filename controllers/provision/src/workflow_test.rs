//! Unit tests for the provision workflow

use crate::classify::{
    ATTEMPT_LABEL, FAILED_TAINT_KEY, PROVISION_FAILED, PROVISION_LABEL, PROVISION_RUNNING,
    PROVISION_SUCCESSFUL,
};
use crate::config::ProvisionConfig;
use crate::error::ErrorKind;
use crate::test_utils::{ready_node, with_label, with_provision};
use crate::workflow::{ProvisionWorkflow, WorkflowOutcome};
use installer::{MockInstaller, MockOutcome};
use k8s_openapi::api::core::v1::{Node, Taint};
use node_api::MockNodeApi;
use std::path::PathBuf;
use std::sync::Arc;

fn test_config() -> ProvisionConfig {
    ProvisionConfig {
        target_label_key: "pai-worker".to_string(),
        playbook_path: PathBuf::from("/playbooks/site.yml"),
        install_retries: 2,
        max_attempts: 3,
        patch_conflict_retries: 3,
        ..Default::default()
    }
}

fn workflow(
    api: &Arc<MockNodeApi>,
    mock_installer: &Arc<MockInstaller>,
) -> ProvisionWorkflow<MockNodeApi, MockInstaller> {
    ProvisionWorkflow::new(
        api.clone(),
        mock_installer.clone(),
        Arc::new(test_config()),
    )
}

fn failure_taint_present(api: &MockNodeApi, name: &str) -> bool {
    api.taints_of(name)
        .iter()
        .any(|t: &Taint| t.key == FAILED_TAINT_KEY)
}

/// Fetch the node fresh from the mock so the workflow sees current state.
fn stored(api: &MockNodeApi, name: &str) -> Node {
    api.node(name).unwrap()
}

#[tokio::test]
async fn successful_run_labels_the_node_and_clears_the_attempt_counter() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert_eq!(outcome, WorkflowOutcome::Provisioned);
    let labels = api.labels_of("n1");
    assert_eq!(
        labels.get(PROVISION_LABEL).map(String::as_str),
        Some(PROVISION_SUCCESSFUL)
    );
    assert_eq!(labels.get("pai-worker").map(String::as_str), Some("true"));
    assert!(labels.get(ATTEMPT_LABEL).is_none());
    assert!(!failure_taint_present(&api, "n1"));
    assert_eq!(mock_installer.install_count("n1"), 1);
}

#[tokio::test]
async fn transient_install_failures_are_retried_within_the_cycle() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    // Two transient failures, then the default success
    mock_installer.push_outcome("n1", MockOutcome::Unreachable);
    mock_installer.push_outcome("n1", MockOutcome::Unreachable);

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert_eq!(outcome, WorkflowOutcome::Provisioned);
    assert_eq!(mock_installer.install_count("n1"), 3);
}

#[tokio::test]
async fn exhausted_install_retries_move_the_node_to_failed() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    mock_installer.set_default_outcome(MockOutcome::Unreachable);

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
    // install-retries = 2 means one initial try plus two retries
    assert_eq!(mock_installer.install_count("n1"), 3);
    assert_eq!(
        api.labels_of("n1").get(PROVISION_LABEL).map(String::as_str),
        Some(PROVISION_FAILED)
    );
    assert!(failure_taint_present(&api, "n1"));
}

#[tokio::test]
async fn fatal_install_failure_skips_retries() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    mock_installer.set_default_outcome(MockOutcome::PlaybookFailure);

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
    assert_eq!(mock_installer.install_count("n1"), 1);
    assert!(failure_taint_present(&api, "n1"));
}

#[tokio::test]
async fn attempt_budget_forces_failed_without_installing() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    let node = with_label(
        with_provision(ready_node("n1"), PROVISION_RUNNING),
        ATTEMPT_LABEL,
        "3",
    );
    api.add_node(node);

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
    assert_eq!(mock_installer.install_count("n1"), 0);
    assert_eq!(
        api.labels_of("n1").get(PROVISION_LABEL).map(String::as_str),
        Some(PROVISION_FAILED)
    );
    assert!(failure_taint_present(&api, "n1"));
}

#[tokio::test]
async fn reentry_after_crash_increments_the_attempt_counter() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    // A crashed attempt left the running marker and one recorded attempt
    let node = with_label(
        with_provision(ready_node("n1"), PROVISION_RUNNING),
        ATTEMPT_LABEL,
        "1",
    );
    api.add_node(node);
    mock_installer.set_default_outcome(MockOutcome::Unreachable);

    // Not yet at the budget: the workflow re-enters at stage 1
    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();

    assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
    assert!(mock_installer.install_count("n1") > 0);
    // The running marker recorded a second attempt before the install ran
    assert_eq!(
        api.labels_of("n1").get(ATTEMPT_LABEL).map(String::as_str),
        Some("2")
    );
}

#[tokio::test]
async fn provisioning_again_after_failure_clears_the_taint() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));

    // First run fails and taints the node
    mock_installer.push_outcome("n1", MockOutcome::PlaybookFailure);
    let wf = workflow(&api, &mock_installer);
    wf.provision_node(&stored(&api, "n1")).await.unwrap();
    assert!(failure_taint_present(&api, "n1"));

    // Operator intervention: clear the failed marker so the node is
    // eligible again (the workflow never does this on its own)
    let labels = std::collections::BTreeMap::from([(PROVISION_LABEL.to_string(), None)]);
    node_api::NodeApi::patch_node_labels(api.as_ref(), "n1", None, &labels)
        .await
        .unwrap();

    let outcome = wf.provision_node(&stored(&api, "n1")).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Provisioned);
    assert!(!failure_taint_present(&api, "n1"));
}

#[tokio::test]
async fn install_error_classification_is_pluggable() {
    use installer::{InstallDisposition, InstallError};

    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    // Fatal under the default classifier
    mock_installer.push_outcome("n1", MockOutcome::PlaybookFailure);

    // An operator-supplied classifier that retries playbook failures too
    let wf = workflow(&api, &mock_installer).with_install_classifier(Arc::new(
        |err: &InstallError| match err {
            InstallError::Playbook { .. } => InstallDisposition::Transient,
            other => installer::default_disposition(other),
        },
    ));

    let outcome = wf.provision_node(&stored(&api, "n1")).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Provisioned);
    assert_eq!(mock_installer.install_count("n1"), 2);
}

#[tokio::test]
async fn patch_conflicts_are_retried_within_the_budget() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    api.fail_next_patches_with_conflict(2);

    let outcome = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap();
    assert_eq!(outcome, WorkflowOutcome::Provisioned);
}

#[tokio::test]
async fn persistent_conflicts_surface_as_api_call_errors() {
    let api = Arc::new(MockNodeApi::new());
    let mock_installer = Arc::new(MockInstaller::new());
    api.add_node(ready_node("n1"));
    // More conflicts than the whole workflow can absorb
    api.fail_next_patches_with_conflict(50);

    let err = workflow(&api, &mock_installer)
        .provision_node(&stored(&api, "n1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiCall);
}
