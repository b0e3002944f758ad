//! Installer trait for mocking
//!
//! This trait abstracts host installation to enable mocking in unit tests.
//! The ansible-backed installer implements this trait, and tests can use
//! the scripted mock implementation.

use crate::error::InstallError;
use k8s_openapi::api::core::v1::Node;

/// Trait for host install operations
///
/// `run_install` is synchronous from the caller's point of view: it
/// resolves once the install has finished, however long that takes. No
/// timeout is imposed here; bounding concurrent installs is the caller's
/// concern.
#[async_trait::async_trait]
pub trait Installer: Send + Sync {
    /// Run host-level setup on the given node.
    async fn run_install(&self, node: &Node) -> Result<(), InstallError>;
}

/// Whether an install failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallDisposition {
    /// Likely to succeed on retry (e.g. transient network to the host)
    Transient,
    /// Retrying will not help (e.g. a failing playbook task)
    Fatal,
}

/// Default install-error disposition.
///
/// Launch failures and unreachable hosts are environmental and retried;
/// a playbook that ran and failed is a logic error and is not.
pub fn default_disposition(err: &InstallError) -> InstallDisposition {
    match err {
        InstallError::Spawn(_) | InstallError::Unreachable(_) | InstallError::Interrupted => {
            InstallDisposition::Transient
        }
        InstallError::Playbook { .. } | InstallError::BadNode(_) => InstallDisposition::Fatal,
    }
}
