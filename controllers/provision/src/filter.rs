//! Ignore-label filter.
//!
//! Operators exclude nodes from provisioning by configuring ignored label
//! keys. Matching is on key presence only; the configured value is not
//! compared.

use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;

/// Drop nodes that carry any key from the ignore set. Order-preserving.
pub fn filter_out_ignored_nodes(
    ignored_labels: &BTreeMap<String, String>,
    nodes: Vec<Node>,
) -> Vec<Node> {
    if ignored_labels.is_empty() {
        return nodes;
    }
    nodes
        .into_iter()
        .filter(|node| !has_ignored_label(ignored_labels, node))
        .collect()
}

fn has_ignored_label(ignored_labels: &BTreeMap<String, String>, node: &Node) -> bool {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return false;
    };
    ignored_labels.keys().any(|key| labels.contains_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ready_node, with_label};

    fn ignore(key: &str, value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(key.to_string(), value.to_string())])
    }

    #[test]
    fn ignored_label_matches_on_key_presence_regardless_of_value() {
        let nodes = vec![
            with_label(ready_node("n1"), "skip", "true"),
            with_label(ready_node("n2"), "skip", "false"),
            ready_node("n3"),
        ];
        // Configured value "true" does not have to match: n2 is excluded too.
        let kept = filter_out_ignored_nodes(&ignore("skip", "true"), nodes);
        let names: Vec<_> = kept
            .iter()
            .map(|n| n.metadata.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["n3"]);
    }

    #[test]
    fn unlabeled_nodes_pass_through_in_order() {
        let nodes = vec![ready_node("b"), ready_node("a"), ready_node("c")];
        let kept = filter_out_ignored_nodes(&ignore("skip", "true"), nodes);
        let names: Vec<_> = kept
            .iter()
            .map(|n| n.metadata.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn empty_ignore_set_keeps_everything() {
        let nodes = vec![with_label(ready_node("n1"), "skip", "true")];
        let kept = filter_out_ignored_nodes(&BTreeMap::new(), nodes);
        assert_eq!(kept.len(), 1);
    }
}
