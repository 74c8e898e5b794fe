//! Taint calculation
//!
//! Computes the taint set a node should carry from its current taints, the
//! configured watches and the pods satisfying them. Only taints under the
//! `readygate.dev/` key prefix are considered; every other taint passes
//! through untouched, in its original position.
//!
//! Existing managed taints are removed unless a watch proves they are still
//! needed, which also clears taints left behind by watches that are no
//! longer configured.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Node, Taint};
use readygate_common::{WorkloadWatch, TAINT_EFFECT_NO_SCHEDULE, TAINT_KEY_PREFIX};

use crate::locator::PodLookup;
use crate::readiness::is_pod_ready;

/// Managed taint keys added and removed by one calculation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaintChanges {
    /// Keys newly added, in watch order
    pub added: Vec<String>,
    /// Keys removed, in their original node order
    pub removed: Vec<String>,
}

impl TaintChanges {
    /// Whether no taint was added or removed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Result of [`calculate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaintCalculation {
    /// Foreign taints, surviving managed taints, then new managed taints
    pub taints: Vec<Taint>,
    /// What changed relative to the node's current taints
    pub changes: TaintChanges,
}

/// Whether a taint key lies in the managed namespace
pub fn is_managed_taint(key: &str) -> bool {
    key.strip_prefix(TAINT_KEY_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// The node's current taints
pub fn node_taints(node: &Node) -> &[Taint] {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or_default()
}

/// The taint placed on a node while `watch` is not satisfied there
pub fn managed_taint(watch: &WorkloadWatch) -> Taint {
    Taint {
        key: watch.taint_key(),
        value: Some(watch.identity()),
        effect: TAINT_EFFECT_NO_SCHEDULE.to_string(),
        time_added: None,
    }
}

/// Compute the node's desired taints and the change record.
///
/// A watch is satisfied when its pod exists on the node and is ready. An
/// unsatisfied watch keeps its existing taint or gets a new one appended;
/// a satisfied watch's taint is removed. Running the calculation again on
/// its own output with the same pods yields no changes.
pub fn calculate<L>(node: &Node, watches: &[WorkloadWatch], pods: &L) -> TaintCalculation
where
    L: PodLookup + ?Sized,
{
    let node_name = node.metadata.name.as_deref().unwrap_or_default();
    let current = node_taints(node);

    let present: BTreeSet<&str> = current
        .iter()
        .map(|t| t.key.as_str())
        .filter(|k| is_managed_taint(k))
        .collect();
    let mut pending_removal = present.clone();

    let mut changes = TaintChanges::default();
    let mut new_taints = Vec::new();

    for watch in watches {
        let key = watch.taint_key();
        let satisfied = pods
            .pod_for(node_name, watch)
            .is_some_and(is_pod_ready);

        if satisfied {
            continue;
        }

        if present.contains(key.as_str()) {
            pending_removal.remove(key.as_str());
        } else if !changes.added.contains(&key) {
            new_taints.push(managed_taint(watch));
            changes.added.push(key);
        }
    }

    let mut taints = Vec::with_capacity(current.len() + new_taints.len());
    for taint in current {
        if pending_removal.contains(taint.key.as_str()) {
            if !changes.removed.contains(&taint.key) {
                changes.removed.push(taint.key.clone());
            }
        } else {
            taints.push(taint.clone());
        }
    }
    taints.extend(new_taints);

    TaintCalculation { taints, changes }
}
