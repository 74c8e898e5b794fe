//! Node scope matching

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use readygate_common::NodeSelector;

/// Whether the node's labels satisfy the configured selector.
///
/// An empty selector manages every node.
pub fn in_scope(node: &Node, selector: &NodeSelector) -> bool {
    match node.metadata.labels.as_ref() {
        Some(labels) => selector.matches(labels),
        None => selector.matches(&BTreeMap::new()),
    }
}
