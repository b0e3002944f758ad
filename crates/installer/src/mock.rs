//! Mock Installer for unit testing
//!
//! This module provides a mock implementation of the Installer trait that
//! can be scripted per node and records every invocation.

use crate::error::InstallError;
use crate::installer_trait::Installer;
use k8s_openapi::api::core::v1::Node;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A scripted install result
///
/// Outcomes are described rather than stored as `InstallError` values so
/// the same script entry can be replayed any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Install succeeds
    Succeed,
    /// Install fails with an unreachable-host error (transient)
    Unreachable,
    /// Install fails with a playbook error (fatal)
    PlaybookFailure,
}

impl MockOutcome {
    fn into_result(self, name: &str) -> Result<(), InstallError> {
        match self {
            MockOutcome::Succeed => Ok(()),
            MockOutcome::Unreachable => Err(InstallError::Unreachable(format!(
                "{}: mock host unreachable",
                name
            ))),
            MockOutcome::PlaybookFailure => Err(InstallError::Playbook {
                code: 2,
                detail: "mock playbook failure".to_string(),
            }),
        }
    }
}

struct MockState {
    // Per-node queues of scripted outcomes, consumed front to back
    scripted: HashMap<String, VecDeque<MockOutcome>>,
    default_outcome: MockOutcome,
    invocations: Vec<String>,
}

/// Mock Installer for testing
#[derive(Clone)]
pub struct MockInstaller {
    inner: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInstaller").finish()
    }
}

impl Default for MockInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstaller {
    /// Create a mock whose installs all succeed
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                scripted: HashMap::new(),
                default_outcome: MockOutcome::Succeed,
                invocations: Vec::new(),
            })),
        }
    }

    /// Set the outcome used when a node has no scripted queue left
    pub fn set_default_outcome(&self, outcome: MockOutcome) {
        self.inner.lock().unwrap().default_outcome = outcome;
    }

    /// Queue an outcome for the next install on the named node
    pub fn push_outcome(&self, name: &str, outcome: MockOutcome) {
        self.inner
            .lock()
            .unwrap()
            .scripted
            .entry(name.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Names of all nodes installed so far, in invocation order
    pub fn invocations(&self) -> Vec<String> {
        self.inner.lock().unwrap().invocations.clone()
    }

    /// Number of installs run against the named node
    pub fn install_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .invocations
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }
}

#[async_trait::async_trait]
impl Installer for MockInstaller {
    async fn run_install(&self, node: &Node) -> Result<(), InstallError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| InstallError::BadNode("node has no name".to_string()))?;

        let mut state = self.inner.lock().unwrap();
        state.invocations.push(name.to_string());
        let outcome = state
            .scripted
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(state.default_outcome);
        outcome.into_result(name)
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
    async fn scripted_outcomes_run_in_order_then_fall_back() {
        let mock = MockInstaller::new();
        mock.push_outcome("n1", MockOutcome::Unreachable);
        mock.push_outcome("n1", MockOutcome::Succeed);

        assert!(mock.run_install(&node("n1")).await.is_err());
        assert!(mock.run_install(&node("n1")).await.is_ok());
        // Queue drained; default outcome applies
        assert!(mock.run_install(&node("n1")).await.is_ok());
        assert_eq!(mock.install_count("n1"), 3);
    }

    #[tokio::test]
    async fn default_outcome_is_configurable() {
        let mock = MockInstaller::new();
        mock.set_default_outcome(MockOutcome::PlaybookFailure);
        assert!(mock.run_install(&node("n2")).await.is_err());
        assert_eq!(mock.invocations(), vec!["n2".to_string()]);
    }
}
