//! Install errors

use thiserror::Error;

/// Errors that can occur while running host installation
///
/// Opaque to the provision controller; it decides retry-vs-fatal through a
/// disposition function rather than by matching variants directly.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The installer process could not be launched
    #[error("failed to launch installer: {0}")]
    Spawn(#[from] std::io::Error),

    /// The target host could not be reached
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The playbook ran and failed
    #[error("playbook failed with exit code {code}: {detail}")]
    Playbook {
        /// Process exit code
        code: i32,
        /// Tail of the captured stderr
        detail: String,
    },

    /// The installer process was killed by a signal
    #[error("installer terminated by signal")]
    Interrupted,

    /// The node is missing data the installer needs (e.g. no address)
    #[error("node unusable for install: {0}")]
    BadNode(String),
}
