//! Kubernetes Node API
//!
//! A thin boundary over the Kubernetes API for the provision controller.
//! Provides type-safe listing, watching, and label/taint patching of
//! cluster `Node` objects.
//!
//! # Example
//!
//! ```no_run
//! use node_api::{KubeNodeApi, NodeApi};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let api = KubeNodeApi::new(client);
//!
//! // List all nodes in the cluster
//! let nodes = api.list_nodes().await?;
//!
//! // Mark a node as being provisioned
//! let mut labels = BTreeMap::new();
//! labels.insert("provision".to_string(), Some("running".to_string()));
//! api.patch_node_labels("worker-1", None, &labels).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Snapshot listing**: one-shot LIST of the node inventory
//! - **Watch streams**: add/delete/resync events for cache maintenance
//! - **Conditional patches**: label and taint merge patches carrying the
//!   observed `resourceVersion`, surfacing conflicts to the caller

pub mod client;
pub mod error;
pub mod event;
#[path = "trait.rs"]
pub mod node_api_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeNodeApi;
pub use error::NodeApiError;
pub use event::NodeEvent;
pub use node_api_trait::NodeApi;
#[cfg(feature = "test-util")]
pub use mock::MockNodeApi;
