//! Host install collaborator
//!
//! Runs host-level setup on a cluster node, currently by executing an
//! ansible-playbook against it. The provision controller treats install
//! failures as opaque and classifies them retry-vs-fatal through
//! [`InstallDisposition`].
//!
//! # Example
//!
//! ```no_run
//! use installer::{AnsiblePlaybookInstaller, Installer};
//! use std::path::PathBuf;
//!
//! # async fn example(node: k8s_openapi::api::core::v1::Node) -> Result<(), Box<dyn std::error::Error>> {
//! let installer = AnsiblePlaybookInstaller::new(
//!     PathBuf::from("/opt/provision/playbooks/site.yml"),
//!     None,
//! );
//! installer.run_install(&node).await?;
//! # Ok(())
//! # }
//! ```

pub mod ansible;
pub mod error;
#[path = "trait.rs"]
pub mod installer_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use ansible::AnsiblePlaybookInstaller;
pub use error::InstallError;
pub use installer_trait::{default_disposition, InstallDisposition, Installer};
#[cfg(feature = "test-util")]
pub use mock::{MockInstaller, MockOutcome};
