//! Ansible-playbook installer
//!
//! Runs the configured playbook against a single node. With a configured
//! inventory file the play is limited to the node by name; without one an
//! ad-hoc single-host inventory is built from the node's internal address.

use crate::error::InstallError;
use crate::installer_trait::Installer;
use k8s_openapi::api::core::v1::Node;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// How many trailing characters of stderr to keep in error messages
const STDERR_TAIL_CHARS: usize = 2048;

/// ansible-playbook exit code for "all target hosts unreachable"
const ANSIBLE_UNREACHABLE: i32 = 4;

/// Installer that shells out to `ansible-playbook`
#[derive(Debug, Clone)]
pub struct AnsiblePlaybookInstaller {
    playbook_path: PathBuf,
    inventory_path: Option<PathBuf>,
}

impl AnsiblePlaybookInstaller {
    /// Create an installer for the given playbook.
    ///
    /// `inventory_path` is optional; without it each run builds an ad-hoc
    /// inventory from the node's internal IP.
    pub fn new(playbook_path: PathBuf, inventory_path: Option<PathBuf>) -> Self {
        Self {
            playbook_path,
            inventory_path,
        }
    }

    fn build_command(&self, name: &str, address: &str) -> Command {
        let mut cmd = Command::new("ansible-playbook");
        cmd.arg(&self.playbook_path);
        match &self.inventory_path {
            Some(inventory) => {
                cmd.arg("-i").arg(inventory).arg("--limit").arg(name);
            }
            None => {
                // Trailing comma makes ansible treat the value as a host
                // list rather than an inventory file.
                cmd.arg("-i").arg(format!("{},", address));
            }
        }
        cmd.arg("-e").arg(format!("node_name={}", name));
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }
}

/// Pick the address ansible should connect to: the internal IP when the
/// node reports one, otherwise its name (resolvable hostnames).
fn connect_address(node: &Node) -> Option<String> {
    let from_status = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| {
            addrs
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone())
        });
    from_status.or_else(|| node.metadata.name.clone())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim_end();
    match trimmed.char_indices().nth_back(STDERR_TAIL_CHARS) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

#[async_trait::async_trait]
impl Installer for AnsiblePlaybookInstaller {
    async fn run_install(&self, node: &Node) -> Result<(), InstallError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| InstallError::BadNode("node has no name".to_string()))?;
        let address = connect_address(node)
            .ok_or_else(|| InstallError::BadNode(format!("no address for node {}", name)))?;

        info!("Running playbook {:?} against node {}", self.playbook_path, name);
        let mut cmd = self.build_command(name, &address);
        debug!("Installer command: {:?}", cmd);

        let output = cmd.output().await?;
        match output.status.code() {
            Some(0) => {
                info!("Playbook finished for node {}", name);
                Ok(())
            }
            Some(ANSIBLE_UNREACHABLE) => Err(InstallError::Unreachable(format!(
                "{}: {}",
                name,
                stderr_tail(&output.stderr)
            ))),
            Some(code) => Err(InstallError::Playbook {
                code,
                detail: stderr_tail(&output.stderr),
            }),
            None => Err(InstallError::Interrupted),
        }
    }
}
