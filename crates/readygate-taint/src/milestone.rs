//! First-ready milestone tracking
//!
//! The annotation is written once, the first time a node carries no managed
//! taints, and is never rewritten or removed afterwards.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Node;
use readygate_common::FIRST_READY_ANNOTATION;

use crate::taints::{is_managed_taint, node_taints};

/// Whether the node currently carries no managed taints
pub fn is_taint_free(node: &Node) -> bool {
    !node_taints(node).iter().any(|t| is_managed_taint(&t.key))
}

/// The stored milestone, if any
pub fn first_ready(node: &Node) -> Option<&str> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(FIRST_READY_ANNOTATION))
        .map(String::as_str)
}

/// Record the first-ready milestone on a node whose taints are already final.
///
/// Returns the milestone value: the existing one when present, `now` when
/// the node just became taint-free for the first time, `None` otherwise.
pub fn apply_milestone(node: &mut Node, now: DateTime<Utc>) -> Option<String> {
    if let Some(existing) = first_ready(node) {
        return Some(existing.to_string());
    }
    if !is_taint_free(node) {
        return None;
    }

    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    node.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(FIRST_READY_ANNOTATION.to_string(), stamp.clone());
    Some(stamp)
}
