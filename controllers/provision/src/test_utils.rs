//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating node fixtures and waiting on
//! background cache updates.

use crate::classify::PROVISION_LABEL;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::time::Duration;

/// A node with a True `Ready` condition and a fixed creation timestamp.
pub fn ready_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            creation_timestamp: Some(Time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![condition("Ready", "True")]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A condition record of the given type and status.
pub fn condition(type_: &str, status: &str) -> NodeCondition {
    NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
        ..Default::default()
    }
}

/// Add a label to the node.
pub fn with_label(mut node: Node, key: &str, value: &str) -> Node {
    node.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    node
}

/// Set the node's `provision` label.
pub fn with_provision(node: Node, value: &str) -> Node {
    with_label(node, PROVISION_LABEL, value)
}

/// Shift the node's creation timestamp by the given offset in seconds,
/// for ordering tests.
pub fn created_at_offset(mut node: Node, offset_secs: i64) -> Node {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    node.metadata.creation_timestamp =
        Some(Time(base + chrono::Duration::seconds(offset_secs)));
    node
}

/// Poll until the condition holds, panicking after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within timeout");
}
