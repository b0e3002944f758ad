//! Provision error taxonomy.
//!
//! Three kinds of failure, each with a different consequence for the loop:
//! internal errors stop the process, configuration errors stop startup (and
//! are operator-recoverable later), API call errors are retried next cycle.
//! Messages compose as they propagate via [`ProvisionError::context`].

use node_api::NodeApiError;
use std::fmt;
use thiserror::Error;

/// High-level category of a provision error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programming or invariant violation; the process should stop
    Internal,
    /// Bad operator input; fatal at startup, recoverable by the operator later
    Configuration,
    /// Cluster API communication failure; always retried next cycle
    ApiCall,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Internal => write!(f, "internal error"),
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::ApiCall => write!(f, "API call error"),
        }
    }
}

/// Error with a kind and a human-readable, composable message
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ProvisionError {
    kind: ErrorKind,
    message: String,
}

impl ProvisionError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Shorthand for a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Shorthand for an `ApiCall` error.
    pub fn api_call(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiCall, message)
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Prefix the message with additional context, keeping the kind.
    ///
    /// ```ignore
    /// api.get_node(name).await
    ///     .map_err(|e| ProvisionError::from(e).context("refreshing node"))?;
    /// ```
    #[must_use]
    pub fn context(mut self, prefix: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", prefix, self.message);
        self
    }

    /// Whether the next cycle may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        self.kind == ErrorKind::ApiCall
    }
}

impl From<NodeApiError> for ProvisionError {
    fn from(err: NodeApiError) -> Self {
        Self::api_call(err.to_string())
    }
}
